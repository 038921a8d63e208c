// crates/coordinator/src/process.rs
//! Control surface of the external agent process.
//!
//! The coordinator never spawns or talks to the process directly — it goes
//! through this trait. The desktop shell implements it over its process
//! manager; tests use a scripted double.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by the agent process control surface.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Resume was rejected — the external session is gone or expired.
    /// Triggers the context-summary fallback in the identity resolver.
    #[error("resume rejected for session {external_id}: {reason}")]
    ResumeRejected { external_id: String, reason: String },

    #[error("failed to start agent process: {message}")]
    Spawn { message: String },

    #[error("cancel request failed: {message}")]
    Cancel { message: String },

    #[error("failed to load session history: {message}")]
    History { message: String },
}

#[async_trait]
pub trait AgentProcess: Send + Sync {
    /// Start a brand-new external session. Events arrive asynchronously on
    /// the bus; this returns once the process has been launched.
    async fn execute(
        &self,
        project_path: &Path,
        prompt: &str,
        model: &str,
    ) -> Result<(), ProcessError>;

    /// Resume an existing external session. May fail with
    /// [`ProcessError::ResumeRejected`] if the session no longer exists.
    async fn resume(
        &self,
        project_path: &Path,
        external_id: &str,
        prompt: &str,
        model: &str,
    ) -> Result<(), ProcessError>;

    /// Best-effort cancellation. The coordinator never assumes this
    /// succeeds quickly — local state is reset regardless.
    async fn cancel(&self, external_id: &str) -> Result<(), ProcessError>;

    /// Raw stream payloads previously recorded for a session, used to seed
    /// the transcript on session-view mount before listening begins.
    async fn load_history(
        &self,
        session_id: &str,
        project_id: &str,
    ) -> Result<Vec<String>, ProcessError>;
}
