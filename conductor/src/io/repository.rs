//! Persistence seam for conversation contexts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::phase::Phase;
use crate::core::state_machine::ConversationContext;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("conversation store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize conversation {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt conversation file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Keyed storage for [`ConversationContext`]s. Last writer wins.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<ConversationContext>, RepositoryError>;

    async fn save(&self, id: &str, context: &ConversationContext) -> Result<(), RepositoryError>;

    /// Deleting an unknown id is not an error.
    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;

    /// Ids whose current phase is `phase`, sorted.
    async fn find_by_phase(&self, phase: Phase) -> Result<Vec<String>, RepositoryError>;

    /// Delete contexts not updated within `older_than`. Returns the number
    /// removed.
    async fn cleanup(&self, older_than: Duration) -> Result<usize, RepositoryError>;

    /// All stored ids, sorted.
    async fn list_ids(&self) -> Result<Vec<String>, RepositoryError>;
}

/// Instant before which a context counts as stale. `None` when the window
/// reaches past the representable range, meaning nothing is stale.
pub(crate) fn stale_cutoff(older_than: Duration) -> Option<DateTime<Utc>> {
    let window = TimeDelta::from_std(older_than).ok()?;
    Utc::now().checked_sub_signed(window)
}

/// Process-local repository, mainly for tests and single-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    contexts: RwLock<BTreeMap<String, ConversationContext>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryRepository {
    async fn load(&self, id: &str) -> Result<Option<ConversationContext>, RepositoryError> {
        Ok(self.contexts.read().await.get(id).cloned())
    }

    async fn save(&self, id: &str, context: &ConversationContext) -> Result<(), RepositoryError> {
        self.contexts
            .write()
            .await
            .insert(id.to_string(), context.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.contexts.write().await.remove(id);
        Ok(())
    }

    async fn find_by_phase(&self, phase: Phase) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .contexts
            .read()
            .await
            .iter()
            .filter(|(_, context)| context.current_phase == phase)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn cleanup(&self, older_than: Duration) -> Result<usize, RepositoryError> {
        let Some(cutoff) = stale_cutoff(older_than) else {
            return Ok(0);
        };
        let mut contexts = self.contexts.write().await;
        let before = contexts.len();
        contexts.retain(|_, context| context.last_updated >= cutoff);
        Ok(before - contexts.len())
    }

    async fn list_ids(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.contexts.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state_machine::{TransitionExtra, transition};

    fn context_in(phase: Phase) -> ConversationContext {
        let mut context = ConversationContext::new();
        if phase != Phase::Analysis {
            transition(&mut context, phase, "test", TransitionExtra::default())
                .expect("reachable from analysis");
        }
        context
    }

    #[tokio::test]
    async fn save_load_delete() {
        let repo = InMemoryRepository::new();
        assert!(repo.load("a").await.expect("load").is_none());

        let context = context_in(Phase::Modifying);
        repo.save("a", &context).await.expect("save");
        assert_eq!(repo.load("a").await.expect("load"), Some(context));

        repo.delete("a").await.expect("delete");
        repo.delete("a").await.expect("delete twice");
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn find_by_phase_filters_and_sorts() {
        let repo = InMemoryRepository::new();
        repo.save("c", &context_in(Phase::Error)).await.expect("save");
        repo.save("a", &context_in(Phase::Error)).await.expect("save");
        repo.save("b", &context_in(Phase::Analysis)).await.expect("save");

        let errors = repo.find_by_phase(Phase::Error).await.expect("find");
        assert_eq!(errors, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(repo.list_ids().await.expect("list"), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cleanup_removes_stale_contexts() {
        let repo = InMemoryRepository::new();
        let mut stale = ConversationContext::new();
        stale.last_updated = Utc::now() - TimeDelta::hours(5);
        repo.save("stale", &stale).await.expect("save");
        repo.save("fresh", &ConversationContext::new())
            .await
            .expect("save");

        let removed = repo
            .cleanup(Duration::from_secs(60 * 60))
            .await
            .expect("cleanup");
        assert_eq!(removed, 1);
        assert_eq!(repo.list_ids().await.expect("list"), vec!["fresh"]);
    }

    #[tokio::test]
    async fn cleanup_with_huge_window_keeps_everything() {
        let repo = InMemoryRepository::new();
        repo.save("a", &ConversationContext::new())
            .await
            .expect("save");
        let removed = repo.cleanup(Duration::MAX).await.expect("cleanup");
        assert_eq!(removed, 0);
    }
}
