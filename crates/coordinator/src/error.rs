// crates/coordinator/src/error.rs
use thiserror::Error;

use crate::process::ProcessError;

/// Channel subscription failed. The listener lifecycle resets so the
/// caller can retry; this is never fatal to the rest of the coordinator.
#[derive(Debug, Error)]
#[error("failed to subscribe to channel \"{topic}\": {message}")]
pub struct SubscriptionError {
    pub topic: String,
    pub message: String,
}

impl SubscriptionError {
    pub fn new(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
        }
    }
}

/// Coordinator-level failures surfaced to the session view.
///
/// Parsing and metrics failures never appear here — they are contained
/// locally (logged and skipped). Every failure path leaves the coordinator
/// in `ActivityState::Idle` with usable controls.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Synchronous validation, raised before any async work starts.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// The external process reported or caused a failure.
    #[error("external agent process error: {0}")]
    External(#[from] ProcessError),

    /// The FIFO is at capacity; the prompt was rejected, not silently dropped.
    #[error("prompt queue is full ({limit} queued)")]
    QueueFull { limit: usize },

    /// The cancel call itself failed. Local state is still forced to Idle;
    /// the external process may keep running with no further visible output.
    #[error("cancellation request failed: {message}")]
    CancellationFailed { message: String },
}

impl CoordinatorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
