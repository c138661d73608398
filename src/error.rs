use thiserror::Error;
use uuid::Uuid;

/// Outcome of a failed call to the generation/embedding provider.
///
/// Only [`CallError::Throttled`] is retried by the gateway; everything
/// else goes straight back to the caller.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("provider throttled the request: {0}")]
    Throttled(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl CallError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, CallError::Throttled(_))
    }
}

/// A question rejected before any retrieval or generation happens.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QuestionError {
    #[error("question is empty")]
    Empty,

    #[error("question is {len} characters long, limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("repository {0} not found")]
    UnknownRepository(Uuid),

    #[error("conversation {0} not found for this repository")]
    UnknownConversation(Uuid),
}

/// Heuristic for providers that report rate limits in the body rather
/// than with a 429 status.
pub fn looks_throttled(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("resource_exhausted")
        || lower.contains("quota")
}
