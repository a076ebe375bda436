//! In-memory sessions for active conversations.
//!
//! A session pairs a conversation's context with its validator (and thereby
//! its no-progress tracker). Each session sits behind its own async mutex so
//! at most one turn runs per conversation at a time. Sessions are ephemeral:
//! evicting one only drops tracker state, the context is reloaded from the
//! repository on next access. A session whose handle is held elsewhere (a
//! turn is running or waiting on it) is never evicted or expired.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::core::state_machine::ConversationContext;
use crate::core::validator::ResponseValidator;

#[derive(Debug)]
pub struct Session {
    pub context: ConversationContext,
    pub validator: ResponseValidator,
}

impl Session {
    pub fn new(context: ConversationContext, validator: ResponseValidator) -> Self {
        Self { context, validator }
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// When sessions leave memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Sessions idle longer than this are dropped on the next registry access.
    pub ttl: Duration,
    /// Inserting beyond this evicts the least recently used idle session.
    /// The limit is exceeded only while every session is busy.
    pub max_sessions: usize,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            max_sessions: 256,
        }
    }
}

struct Entry {
    session: SessionHandle,
    last_access: Instant,
}

impl Entry {
    /// Someone besides the registry holds the handle or the lock.
    fn is_busy(&self) -> bool {
        Arc::strong_count(&self.session) > 1 || self.session.try_lock().is_err()
    }
}

pub struct SessionRegistry {
    policy: EvictionPolicy,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SessionRegistry {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Live session for `id`, refreshing its access time.
    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries, now);
        let entry = entries.get_mut(id)?;
        entry.last_access = now;
        Some(Arc::clone(&entry.session))
    }

    /// Register `session` unless another task registered `id` first, in
    /// which case the existing session wins and `session` is dropped.
    pub async fn get_or_insert(&self, id: &str, session: Session) -> SessionHandle {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries, now);
        if let Some(entry) = entries.get_mut(id) {
            entry.last_access = now;
            return Arc::clone(&entry.session);
        }
        while entries.len() >= self.policy.max_sessions.max(1) {
            let Some(oldest) = entries
                .iter()
                .filter(|(_, entry)| !entry.is_busy())
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone())
            else {
                debug!(live = entries.len(), "all sessions busy; exceeding capacity");
                break;
            };
            debug!(id = %oldest, "evicting least recently used session");
            entries.remove(&oldest);
        }
        let handle = Arc::new(Mutex::new(session));
        entries.insert(
            id.to_string(),
            Entry {
                session: Arc::clone(&handle),
                last_access: now,
            },
        );
        handle
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.entries.lock().await.remove(id).is_some()
    }

    /// Ids of live sessions, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries, now);
        let mut ids: Vec<String> = entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn purge_expired(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let ttl = self.policy.ttl;
        entries.retain(|id, entry| {
            let live =
                entry.is_busy() || now.saturating_duration_since(entry.last_access) <= ttl;
            if !live {
                debug!(%id, "session expired");
            }
            live
        });
    }
}
