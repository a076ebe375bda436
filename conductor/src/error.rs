//! Errors surfaced by the controller.
//!
//! Protocol failures (invalid responses, no progress, exhausted retries,
//! rejected producer calls) are not errors; they come back as
//! [`TurnOutcome::Failure`](crate::core::types::TurnOutcome).

use thiserror::Error;

use crate::core::phase::Phase;
use crate::core::state_machine::TransitionError;
use crate::io::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("conversation {id} is closed ({phase})")]
    ConversationClosed { id: String, phase: Phase },
}
