//! Producer abstraction for the external text generator.
//!
//! The [`Producer`] trait decouples turn orchestration from the generative
//! backend. Tests use scripted producers that return predetermined responses
//! without any network traffic.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a producer call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProducerError {
    #[error("producer timed out after {0:?}")]
    Timeout(Duration),

    #[error("producer transport failed: {0}")]
    Transport(String),

    #[error("producer rejected the request: {0}")]
    Rejected(String),
}

impl ProducerError {
    /// Timeouts and transport failures count against the attempt budget;
    /// rejections end the turn.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProducerError::Timeout(_) | ProducerError::Transport(_) => true,
            ProducerError::Rejected(_) => false,
        }
    }
}

/// Source of raw response text for one attempt.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn generate(&self) -> Result<String, ProducerError>;
}

/// Adapter turning an async closure into a [`Producer`].
pub struct FnProducer<F>(pub F);

#[async_trait]
impl<F, Fut> Producer for FnProducer<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ProducerError>> + Send,
{
    async fn generate(&self) -> Result<String, ProducerError> {
        (self.0)().await
    }
}
