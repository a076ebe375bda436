//! Test-only helpers: scripted producers, an observable repository, and
//! ready-made controllers.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::controller::{Controller, TurnSettings};
use crate::core::phase::Phase;
use crate::core::state_machine::ConversationContext;
use crate::io::producer::{Producer, ProducerError};
use crate::io::repository::{ConversationRepository, InMemoryRepository, RepositoryError};
use crate::registry::EvictionPolicy;

/// One scripted producer reaction.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(String),
    Fail(ProducerError),
    /// Never resolve; only the controller's timeout ends the attempt.
    Stall,
}

/// Producer replaying a fixed script, then an optional fallback forever.
#[derive(Debug)]
pub struct ScriptedProducer {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    calls: AtomicU32,
}

impl ScriptedProducer {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Responses in order.
    pub fn responses(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|text| respond(text)).collect())
    }

    /// Always the same step.
    pub fn repeating(step: Step) -> Self {
        Self {
            fallback: Some(step),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Producer for ScriptedProducer {
    async fn generate(&self) -> Result<String, ProducerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.steps.lock().await.pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(Step::Respond(text)) => Ok(text),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Stall) => std::future::pending::<Result<String, ProducerError>>().await,
            None => Err(ProducerError::Rejected("script exhausted".to_string())),
        }
    }
}

/// Producer that parks inside `generate` until released, so a test can hold a
/// turn open.
#[derive(Debug)]
pub struct GatedProducer {
    response: String,
    entered: Notify,
    release: Notify,
}

impl GatedProducer {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Wait until a turn is parked in `generate`.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Producer for GatedProducer {
    async fn generate(&self) -> Result<String, ProducerError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.response.clone())
    }
}

/// In-memory repository that counts successful saves and can be told to fail
/// the next few.
#[derive(Debug, Default)]
pub struct CountingRepository {
    inner: InMemoryRepository,
    saves: AtomicU32,
    failing_saves: AtomicU32,
}

impl CountingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` saves fail with an I/O error.
    pub fn fail_next_saves(&self, count: u32) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Saves that reached the store.
    pub fn saves(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationRepository for CountingRepository {
    async fn load(&self, id: &str) -> Result<Option<ConversationContext>, RepositoryError> {
        self.inner.load(id).await
    }

    async fn save(&self, id: &str, context: &ConversationContext) -> Result<(), RepositoryError> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if failing.is_ok() {
            return Err(RepositoryError::Io {
                path: PathBuf::from(id),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.save(id, context).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.inner.delete(id).await
    }

    async fn find_by_phase(&self, phase: Phase) -> Result<Vec<String>, RepositoryError> {
        self.inner.find_by_phase(phase).await
    }

    async fn cleanup(&self, older_than: Duration) -> Result<usize, RepositoryError> {
        self.inner.cleanup(older_than).await
    }

    async fn list_ids(&self) -> Result<Vec<String>, RepositoryError> {
        self.inner.list_ids().await
    }
}

pub fn respond(text: &str) -> Step {
    Step::Respond(text.to_string())
}

pub fn transport_failure() -> Step {
    Step::Fail(ProducerError::Transport("connection reset".to_string()))
}

/// Controller over an empty in-memory repository.
pub fn memory_controller(settings: TurnSettings) -> Controller<InMemoryRepository> {
    Controller::new(
        InMemoryRepository::new(),
        settings,
        EvictionPolicy::default(),
    )
}

/// Default settings with a short producer timeout.
pub fn fast_settings() -> TurnSettings {
    TurnSettings {
        producer_timeout: Duration::from_secs(5),
        ..TurnSettings::default()
    }
}
