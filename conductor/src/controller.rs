//! Turn orchestration for conversations.
//!
//! [`Controller::process_turn`] drives one turn: call the producer (the only
//! suspension point), validate the response against the current phase,
//! commit the suggested transition, and persist. Invalid responses and
//! retryable producer failures are regenerated within the attempt budget;
//! every terminal outcome commits exactly one transition to `ERROR`.
//!
//! Intermediate attempts are never persisted. Each committed change is
//! applied to a copy of the context, saved, and only then swapped into the
//! session, so a failed save leaves the session as it was. A turn that ends
//! in an error also rolls back the no-progress tracker.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::core::no_progress::NoProgressTracker;
use crate::core::phase::Phase;
use crate::core::retry::RetryBudget;
use crate::core::state_machine::{
    ConversationContext, TransitionExtra, TransitionRecord, transition,
};
use crate::core::types::{FailureCode, TurnOutcome};
use crate::core::validator::ResponseValidator;
use crate::error::OrchestratorError;
use crate::io::config::ConductorConfig;
use crate::io::producer::{Producer, ProducerError};
use crate::io::repository::ConversationRepository;
use crate::registry::{EvictionPolicy, Session, SessionHandle, SessionRegistry};

/// Knobs for the turn loop, usually derived from [`ConductorConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSettings {
    /// Producer attempts allowed per turn.
    pub max_retries: u32,
    pub producer_timeout: Duration,
    pub no_progress_threshold: u32,
    pub auto_retry_on_invalid_tags: bool,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from_config(&ConductorConfig::default())
    }
}

impl TurnSettings {
    pub fn from_config(config: &ConductorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            producer_timeout: config.producer_timeout(),
            no_progress_threshold: config.no_progress_threshold,
            auto_retry_on_invalid_tags: config.auto_retry_on_invalid_tags,
        }
    }
}

/// Result of one turn plus the conversation's full history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReport {
    pub conversation_id: String,
    pub outcome: TurnOutcome,
    /// Producer calls made during the turn.
    pub attempts: u32,
    pub history: Vec<TransitionRecord>,
}

pub struct Controller<R> {
    repository: R,
    registry: SessionRegistry,
    settings: TurnSettings,
}

impl<R: ConversationRepository> Controller<R> {
    pub fn new(repository: R, settings: TurnSettings, policy: EvictionPolicy) -> Self {
        Self {
            repository,
            registry: SessionRegistry::new(policy),
            settings,
        }
    }

    pub fn from_config(repository: R, config: &ConductorConfig) -> Self {
        Self::new(
            repository,
            TurnSettings::from_config(config),
            EvictionPolicy {
                ttl: config.registry_ttl(),
                max_sessions: config.registry.max_sessions,
            },
        )
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> TurnSettings {
        self.settings
    }

    fn new_validator(&self) -> ResponseValidator {
        ResponseValidator::new(
            NoProgressTracker::new(self.settings.no_progress_threshold),
            self.settings.auto_retry_on_invalid_tags,
        )
    }

    /// Live session for `id`, loading the stored context or starting a fresh
    /// one in `ANALYSIS`. Fresh contexts are not persisted here.
    async fn session(&self, id: &str) -> Result<SessionHandle, OrchestratorError> {
        if let Some(handle) = self.registry.get(id).await {
            return Ok(handle);
        }
        let context = match self.repository.load(id).await? {
            Some(context) => {
                debug!(id, phase = %context.current_phase, "loaded conversation");
                context
            }
            None => ConversationContext::new(),
        };
        let session = Session::new(context, self.new_validator());
        Ok(self.registry.get_or_insert(id, session).await)
    }

    /// Apply `target` to a copy of the session's context, persist it, then
    /// commit it to the session.
    async fn commit(
        &self,
        id: &str,
        session: &mut Session,
        target: Phase,
        trigger: &str,
        extra: TransitionExtra,
    ) -> Result<(), OrchestratorError> {
        let mut next = session.context.clone();
        transition(&mut next, target, trigger, extra)?;
        self.repository.save(id, &next).await?;
        session.context = next;
        Ok(())
    }

    async fn fail(
        &self,
        id: &str,
        session: &mut Session,
        code: FailureCode,
        message: String,
    ) -> Result<TurnOutcome, OrchestratorError> {
        warn!(id, %code, from = %session.context.current_phase, %message, "conversation failed");
        self.commit(
            id,
            session,
            Phase::Error,
            code.trigger(),
            TransitionExtra::error(code, message),
        )
        .await?;
        Ok(TurnOutcome::Failure(code))
    }

    /// Load or create the conversation and make sure it is persisted.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn start(&self, id: &str) -> Result<Phase, OrchestratorError> {
        let handle = self.session(id).await?;
        let session = handle.lock().await;
        if self.repository.load(id).await?.is_none() {
            self.repository.save(id, &session.context).await?;
            info!(id, "conversation started");
        }
        Ok(session.context.current_phase)
    }

    /// Run one turn against `producer`.
    ///
    /// Returns [`OrchestratorError::ConversationClosed`] without calling the
    /// producer when the conversation is already `FINISHED` or in `ERROR`.
    #[instrument(skip_all, fields(id = %id, max_retries = self.settings.max_retries))]
    pub async fn process_turn<P>(
        &self,
        id: &str,
        producer: &P,
    ) -> Result<TurnReport, OrchestratorError>
    where
        P: Producer + ?Sized,
    {
        let handle = self.session(id).await?;
        let mut guard = handle.lock().await;
        let session = &mut *guard;

        let phase = session.context.current_phase;
        if phase.is_closed() {
            return Err(OrchestratorError::ConversationClosed {
                id: id.to_string(),
                phase,
            });
        }

        let mut budget = RetryBudget::new(self.settings.max_retries);
        let checkpoint = session.validator.clone();
        let outcome = match self.run_attempts(id, session, producer, &mut budget).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // Nothing was committed, so the tracker must not count this turn.
                session.validator = checkpoint;
                return Err(err);
            }
        };
        debug!(id, state = ?budget.state(), "turn settled");

        Ok(TurnReport {
            conversation_id: id.to_string(),
            outcome,
            attempts: budget.attempts(),
            history: session.context.transition_history.clone(),
        })
    }

    /// The attempt loop of [`Controller::process_turn`]. Any error leaves
    /// `session.context` untouched.
    async fn run_attempts<P>(
        &self,
        id: &str,
        session: &mut Session,
        producer: &P,
        budget: &mut RetryBudget,
    ) -> Result<TurnOutcome, OrchestratorError>
    where
        P: Producer + ?Sized,
    {
        let mut last_problem = String::from("no attempt made");
        let outcome = loop {
            let Some(attempt) = budget.begin() else {
                budget.fail();
                let message = format!(
                    "gave up after {} attempts: {last_problem}",
                    budget.max_attempts()
                );
                break self
                    .fail(id, session, FailureCode::MaxRetriesExceeded, message)
                    .await?;
            };

            let produced = match timeout(self.settings.producer_timeout, producer.generate()).await
            {
                Ok(produced) => produced,
                Err(_) => Err(ProducerError::Timeout(self.settings.producer_timeout)),
            };
            let text = match produced {
                Ok(text) => text,
                Err(err) if err.is_retryable() => {
                    warn!(id, attempt, error = %err, "producer attempt failed");
                    last_problem = err.to_string();
                    budget.retry();
                    continue;
                }
                Err(err) => {
                    budget.fail();
                    break self
                        .fail(id, session, FailureCode::ExternalCallError, err.to_string())
                        .await?;
                }
            };

            let result = session
                .validator
                .validate(&text, session.context.current_phase);

            if result.valid {
                match result.suggested_next_phase {
                    Some(next) => {
                        let extra = TransitionExtra::default()
                            .with_tags(&result.effective_tags)
                            .with_detail("attempt", attempt);
                        self.commit(id, session, next, "response_processed", extra)
                            .await?;
                    }
                    None => {
                        self.repository.save(id, &session.context).await?;
                    }
                }
                budget.succeed();
                info!(
                    id,
                    attempt,
                    phase = %session.context.current_phase,
                    "turn committed"
                );
                break TurnOutcome::Success(session.context.current_phase);
            }

            if result.is_no_progress {
                budget.fail();
                let message = format!(
                    "{} identical turns in {} with tags {:?}",
                    session.validator.tracker().consecutive_repeats() + 1,
                    result.phase,
                    result.effective_tags
                );
                break self
                    .fail(id, session, FailureCode::NoProgress, message)
                    .await?;
            }

            last_problem = if result.invalid_tags.is_empty() {
                format!("no tags allowed in {} were found", result.phase)
            } else {
                format!("tags not allowed in {}: {:?}", result.phase, result.invalid_tags)
            };

            if result.requires_regeneration {
                debug!(id, attempt, problem = %last_problem, "regenerating response");
                budget.retry();
                continue;
            }

            budget.fail();
            break self
                .fail(id, session, FailureCode::InvalidTagsExceeded, last_problem)
                .await?;
        };
        Ok(outcome)
    }

    /// The host supplied the requested information: `AWAITING_INFO ->
    /// ANALYSIS`. Any other phase is left alone.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn info_received(&self, id: &str) -> Result<Phase, OrchestratorError> {
        let handle = self.session(id).await?;
        let mut guard = handle.lock().await;
        let session = &mut *guard;
        let phase = session.context.current_phase;
        if phase != Phase::AwaitingInfo {
            warn!(id, %phase, "info received outside AWAITING_INFO; ignoring");
            return Ok(phase);
        }
        self.commit(
            id,
            session,
            Phase::Analysis,
            "host_info_received",
            TransitionExtra::default(),
        )
        .await?;
        Ok(session.context.current_phase)
    }

    /// Manual transition. Illegal targets surface as
    /// [`OrchestratorError::InvalidTransition`].
    #[instrument(skip_all, fields(id = %id, target = %target))]
    pub async fn transition(
        &self,
        id: &str,
        target: Phase,
        trigger: &str,
    ) -> Result<Phase, OrchestratorError> {
        let handle = self.session(id).await?;
        let mut guard = handle.lock().await;
        let session = &mut *guard;
        self.commit(id, session, target, trigger, TransitionExtra::default())
            .await?;
        Ok(session.context.current_phase)
    }

    /// `ERROR -> ANALYSIS`, clearing the error payload and the no-progress
    /// history. Conversations outside `ERROR` are left alone.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn recover(&self, id: &str) -> Result<Phase, OrchestratorError> {
        let handle = self.session(id).await?;
        let mut guard = handle.lock().await;
        let session = &mut *guard;
        let phase = session.context.current_phase;
        if phase != Phase::Error {
            warn!(id, %phase, "recover called outside ERROR; ignoring");
            return Ok(phase);
        }
        self.commit(
            id,
            session,
            Phase::Analysis,
            "error_recovery",
            TransitionExtra::default(),
        )
        .await?;
        session.validator.clear_history();
        info!(id, "conversation recovered");
        Ok(session.context.current_phase)
    }

    /// Start over in `ANALYSIS` with empty history.
    #[instrument(skip_all, fields(id = %id))]
    ///
    /// The live session is reset in place under its lock, so a turn still
    /// running for `id` finishes first.
    pub async fn reset(&self, id: &str) -> Result<(), OrchestratorError> {
        let handle = self.session(id).await?;
        let mut session = handle.lock().await;
        let context = ConversationContext::new();
        self.repository.save(id, &context).await?;
        *session = Session::new(context, self.new_validator());
        info!(id, "conversation reset");
        Ok(())
    }

    /// Drop the session and the stored context.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn remove(&self, id: &str) -> Result<(), OrchestratorError> {
        self.registry.remove(id).await;
        self.repository.delete(id).await?;
        info!(id, "conversation removed");
        Ok(())
    }

    pub async fn phase(&self, id: &str) -> Result<Phase, OrchestratorError> {
        let handle = self.session(id).await?;
        let session = handle.lock().await;
        Ok(session.context.current_phase)
    }

    pub async fn history(&self, id: &str) -> Result<Vec<TransitionRecord>, OrchestratorError> {
        let handle = self.session(id).await?;
        let session = handle.lock().await;
        Ok(session.context.transition_history.clone())
    }

    /// Stored conversations per phase. Every phase is present.
    pub async fn statistics(&self) -> Result<BTreeMap<Phase, usize>, OrchestratorError> {
        let mut counts = BTreeMap::new();
        for phase in Phase::ALL {
            let ids = self.repository.find_by_phase(phase).await?;
            counts.insert(phase, ids.len());
        }
        Ok(counts)
    }

    pub async fn error_conversations(&self) -> Result<Vec<String>, OrchestratorError> {
        Ok(self.repository.find_by_phase(Phase::Error).await?)
    }

    /// Delete stored contexts idle longer than `older_than` and drop sessions
    /// whose context is gone.
    #[instrument(skip_all, fields(older_than_secs = older_than.as_secs()))]
    pub async fn cleanup(&self, older_than: Duration) -> Result<usize, OrchestratorError> {
        let removed = self.repository.cleanup(older_than).await?;
        for id in self.registry.ids().await {
            if self.repository.load(&id).await?.is_none() {
                self.registry.remove(&id).await;
            }
        }
        info!(removed, "cleanup finished");
        Ok(removed)
    }
}
