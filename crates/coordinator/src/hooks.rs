// crates/coordinator/src/hooks.rs
//! Side-effect seams fired by the completion dispatcher.
//!
//! Both surfaces are best-effort: a failing checkpoint evaluation or a
//! silent notifier must never roll back completion state or block the
//! queue drain.

use async_trait::async_trait;
use thiserror::Error;

use agent_desk_protocol::EventEnvelope;

use crate::session::SessionHandle;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint evaluation failed: {message}")]
    Evaluation { message: String },

    #[error("failed to persist session history: {message}")]
    Persistence { message: String },
}

/// Persistence hooks owned by the host application.
#[async_trait]
pub trait CheckpointHooks: Send + Sync {
    /// Decide whether a checkpoint is due after a successful completion and
    /// create one if so. Returns whether a checkpoint was created.
    async fn evaluate_auto_checkpoint(
        &self,
        handle: &SessionHandle,
        message_count: usize,
    ) -> Result<bool, CheckpointError>;

    /// Persist the canonical transcript (called on teardown).
    async fn save_history(
        &self,
        handle: &SessionHandle,
        entries: &[EventEnvelope],
    ) -> Result<(), CheckpointError>;
}

/// Terminal notification (sound/visual) when a prompt finishes.
pub trait Notifier: Send + Sync {
    fn session_complete(&self, success: bool);
}

/// Default hooks for hosts without checkpointing.
pub struct NoopCheckpointHooks;

#[async_trait]
impl CheckpointHooks for NoopCheckpointHooks {
    async fn evaluate_auto_checkpoint(
        &self,
        _handle: &SessionHandle,
        _message_count: usize,
    ) -> Result<bool, CheckpointError> {
        Ok(false)
    }

    async fn save_history(
        &self,
        _handle: &SessionHandle,
        _entries: &[EventEnvelope],
    ) -> Result<(), CheckpointError> {
        Ok(())
    }
}

/// Default notifier: silent.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn session_complete(&self, _success: bool) {}
}
