// crates/coordinator/src/session.rs
//! The session coordinator: one instance per open session view.
//!
//! Owns the transcript, the activity state, the prompt queue, and the
//! listener lifecycle; nothing else mutates them. The host pumps
//! [`StreamSignal`]s from the receiver returned by the constructor into
//! [`SessionCoordinator::handle_signal`], preserving arrival order — the
//! coordinator never reorders.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use agent_desk_protocol::{parse_envelope, EventEnvelope};

use crate::bus::EventBus;
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::hooks::{CheckpointHooks, Notifier};
use crate::listener::{ListenerLifecycle, StreamSignal};
use crate::metrics::SessionMetrics;
use crate::process::{AgentProcess, ProcessError};
use crate::queue::{ActivityState, PromptQueue, QueuedPrompt};
use crate::resolver::{self, ResumeOutcome};
use crate::transcript::Transcript;

/// Buffered signals between the listener forwarders and the host's pump.
const SIGNAL_BUFFER: usize = 256;

/// Identity of one logical conversation.
///
/// `external_id` is write-once: once the external process has announced an
/// identity, it never changes for this handle. A different externally
/// observed identity means a *new* handle.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub local_id: String,
    external_id: Option<String>,
    pub project_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn new(project_path: PathBuf) -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            external_id: None,
            project_path,
            created_at: Utc::now(),
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    /// Record the external identity. Returns true when newly set; an
    /// already-identified handle is left untouched.
    pub fn record_external_id(&mut self, id: &str) -> bool {
        if self.external_id.is_some() {
            return false;
        }
        self.external_id = Some(id.to_string());
        true
    }
}

/// What happened to a submitted prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitReceipt {
    /// Dispatched to the external process immediately.
    Dispatched(ResumeOutcome),
    /// Another prompt is in flight; queued behind it.
    Queued { id: String },
}

pub struct SessionCoordinator {
    handle: SessionHandle,
    config: CoordinatorConfig,
    bus: Arc<dyn EventBus>,
    process: Arc<dyn AgentProcess>,
    checkpoints: Arc<dyn CheckpointHooks>,
    notifier: Arc<dyn Notifier>,
    transcript: Transcript,
    queue: PromptQueue,
    activity: ActivityState,
    listeners: ListenerLifecycle,
    signal_tx: mpsc::Sender<StreamSignal>,
    prompt_started_at: Option<DateTime<Utc>>,
}

impl SessionCoordinator {
    /// Build a coordinator for a fresh session view. The returned receiver
    /// must be pumped into [`handle_signal`](Self::handle_signal) by the
    /// host's event loop.
    pub fn new(
        project_path: PathBuf,
        config: CoordinatorConfig,
        bus: Arc<dyn EventBus>,
        process: Arc<dyn AgentProcess>,
        checkpoints: Arc<dyn CheckpointHooks>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, mpsc::Receiver<StreamSignal>) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let max_queued = config.queue.max_queued;
        let coordinator = Self {
            handle: SessionHandle::new(project_path),
            config,
            bus,
            process,
            checkpoints,
            notifier,
            transcript: Transcript::new(),
            queue: PromptQueue::new(max_queued),
            activity: ActivityState::Idle,
            listeners: ListenerLifecycle::Unsubscribed,
            signal_tx,
            prompt_started_at: None,
        };
        (coordinator, signal_rx)
    }

    /// Build a coordinator for a previously-known external session. The
    /// transcript still starts empty; call [`mount`](Self::mount) to seed it.
    pub fn resuming(
        project_path: PathBuf,
        external_id: &str,
        config: CoordinatorConfig,
        bus: Arc<dyn EventBus>,
        process: Arc<dyn AgentProcess>,
        checkpoints: Arc<dyn CheckpointHooks>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, mpsc::Receiver<StreamSignal>) {
        let (mut coordinator, rx) =
            Self::new(project_path, config, bus, process, checkpoints, notifier);
        coordinator.handle.record_external_id(external_id);
        (coordinator, rx)
    }

    /// Seed the transcript from persisted history. Called on session-view
    /// mount, before any listening begins. Unparseable lines are logged and
    /// skipped; returns how many envelopes were seeded.
    pub async fn mount(&mut self) -> Result<usize, CoordinatorError> {
        let session_id = self
            .handle
            .external_id()
            .unwrap_or(&self.handle.local_id)
            .to_string();
        let project_id = self.handle.project_path.display().to_string();
        let raw_lines = self.process.load_history(&session_id, &project_id).await?;

        let mut seeded = 0;
        for line in raw_lines {
            match parse_envelope(&line) {
                Ok(envelope) => {
                    self.transcript.append(envelope);
                    seeded += 1;
                }
                Err(err) => warn!(error = %err, "skipping unparseable history line"),
            }
        }
        debug!(seeded, session_id = %session_id, "transcript seeded from history");
        Ok(seeded)
    }

    /// Submit a prompt. Dispatches immediately when idle, queues otherwise.
    /// Validation failures surface synchronously, before any async work.
    pub async fn submit(
        &mut self,
        text: &str,
        model: &str,
    ) -> Result<SubmitReceipt, CoordinatorError> {
        if self.handle.project_path.as_os_str().is_empty() {
            return Err(CoordinatorError::validation("project path is empty"));
        }
        if text.trim().is_empty() {
            return Err(CoordinatorError::validation("prompt is empty"));
        }

        match self.activity {
            ActivityState::Idle => {
                let outcome = self.dispatch(text, model).await?;
                Ok(SubmitReceipt::Dispatched(outcome))
            }
            ActivityState::InFlight | ActivityState::Cancelling => {
                let prompt = QueuedPrompt::new(text, model);
                let id = prompt.id.clone();
                self.queue
                    .push(prompt)
                    .map_err(|limit| CoordinatorError::QueueFull { limit })?;
                debug!(queued = self.queue.len(), "prompt queued behind in-flight work");
                Ok(SubmitReceipt::Queued { id })
            }
        }
    }

    /// Cancel the in-flight prompt. Local state is forced back to idle and
    /// the queue cleared regardless of whether the external process
    /// acknowledges; a failed cancel call is still reported to the caller.
    pub async fn cancel(&mut self) -> Result<(), CoordinatorError> {
        if self.activity == ActivityState::Idle {
            return Ok(());
        }
        self.activity = ActivityState::Cancelling;

        let cancel_result = match self.handle.external_id() {
            Some(id) => {
                let id = id.to_string();
                self.process.cancel(&id).await
            }
            // Identity never arrived; there is nothing addressable to
            // cancel externally. Local reset still applies.
            None => Ok(()),
        };

        self.force_idle_after_cancel();

        match cancel_result {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(
                    error = %err,
                    "cancel request failed; external process may keep running with no further visible output"
                );
                Err(CoordinatorError::CancellationFailed {
                    message: err.to_string(),
                })
            }
        }
    }

    /// Remove a queued-but-undispatched prompt.
    pub fn remove_queued(&mut self, id: &str) -> bool {
        self.queue.remove(id)
    }

    /// Handle one signal from the active listener set, in arrival order.
    pub async fn handle_signal(&mut self, signal: StreamSignal) {
        match signal {
            StreamSignal::Output(raw) => self.handle_output(&raw),
            StreamSignal::ProcessError(message) => {
                warn!(error = %message, "agent process reported an error");
                self.transcript.append(EventEnvelope::error(message));
            }
            StreamSignal::Complete(success) => {
                if self.activity == ActivityState::InFlight {
                    self.on_complete(success).await;
                } else {
                    // Late acknowledgment after cancel/teardown; must not
                    // reopen the old state.
                    debug!(?success, state = ?self.activity, "ignoring completion signal while not in flight");
                }
            }
            StreamSignal::Cancelled(_) => {
                if self.activity != ActivityState::Idle {
                    info!("cancellation completed by the external process");
                    self.force_idle_after_cancel();
                }
            }
        }
    }

    /// Unmount the session view: stop listening, persist the transcript.
    /// Stored history survives, so the session remains resumable.
    pub async fn teardown(&mut self) {
        self.listeners.teardown();
        self.activity = ActivityState::Idle;
        if let Err(err) = self
            .checkpoints
            .save_history(&self.handle, self.transcript.entries())
            .await
        {
            warn!(error = %err, "failed to persist session history on teardown");
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn activity(&self) -> ActivityState {
        self.activity
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn queued(&self) -> Vec<QueuedPrompt> {
        self.queue.iter().cloned().collect()
    }

    pub fn is_listening(&self) -> bool {
        self.listeners.is_listening()
    }

    /// The user-facing view of the transcript.
    pub fn visible(&self) -> Vec<EventEnvelope> {
        self.transcript.visible_projection(
            &self.config.dedup,
            &self.config.surfaced_tools_or_default(),
        )
    }

    // ── Internals ──────────────────────────────────────────────────────

    /// Send one prompt to the external process. Exactly one prompt is in
    /// flight at a time; callers guarantee the coordinator is idle.
    async fn dispatch(&mut self, text: &str, model: &str) -> Result<ResumeOutcome, CoordinatorError> {
        self.activity = ActivityState::InFlight;
        self.prompt_started_at = Some(Utc::now());

        if let Err(err) = self.ensure_listening() {
            self.activity = ActivityState::Idle;
            self.prompt_started_at = None;
            return Err(err.into());
        }

        // Resume decision and fallback summary are taken over the prior
        // exchanges, before this prompt's own envelope lands.
        let resume_wanted = resolver::should_resume(&self.handle, &self.transcript);
        let fallback_summary = resolver::summarize_exchanges(&self.transcript);

        self.transcript.append(EventEnvelope::user_text(text));

        let outcome = if let Some(external_id) = self.handle.external_id().map(str::to_string) {
            match self
                .process
                .resume(&self.handle.project_path, &external_id, text, model)
                .await
            {
                Ok(()) => Ok(ResumeOutcome::Resumed),
                Err(ProcessError::ResumeRejected { reason, .. }) => {
                    warn!(external_id = %external_id, reason = %reason, "resume rejected; falling back to a fresh session");
                    self.start_fresh_with_context(fallback_summary, text, model)
                        .await
                }
                Err(err) => Err(err.into()),
            }
        } else if resume_wanted {
            // Prior activity but no captured identity: a resume is not
            // addressable, so carry the context into a fresh session.
            self.start_fresh_with_context(fallback_summary, text, model)
                .await
        } else {
            self.process
                .execute(&self.handle.project_path, text, model)
                .await
                .map(|()| ResumeOutcome::StartedFresh {
                    context_injected: false,
                })
                .map_err(CoordinatorError::from)
        };

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.activity = ActivityState::Idle;
                self.prompt_started_at = None;
                Err(err)
            }
        }
    }

    /// Fallback after a rejected (or unaddressable) resume: start a fresh
    /// external session, prepending a summary of the prior exchanges so
    /// conversational context is not silently lost. Best-effort, no retry.
    async fn start_fresh_with_context(
        &mut self,
        summary: Option<String>,
        text: &str,
        model: &str,
    ) -> Result<ResumeOutcome, CoordinatorError> {
        let prompt = match &summary {
            Some(summary) => resolver::prompt_with_context(summary, text),
            None => text.to_string(),
        };

        // The fresh process will announce a new identity, and external_id
        // is write-once — so this becomes a new handle (transcript and
        // queue carry over), and listening restarts generic until the new
        // init arrives.
        let project_path = self.handle.project_path.clone();
        if self.handle.external_id().is_some() {
            self.handle = SessionHandle::new(project_path.clone());
            self.listeners.teardown();
            self.ensure_listening()
                .map_err(CoordinatorError::from)?;
        }

        self.process
            .execute(&project_path, &prompt, model)
            .await
            .map_err(CoordinatorError::from)?;

        Ok(ResumeOutcome::StartedFresh {
            context_injected: summary.is_some(),
        })
    }

    fn ensure_listening(&mut self) -> Result<(), crate::error::SubscriptionError> {
        match self.handle.external_id() {
            Some(id) => {
                let id = id.to_string();
                self.listeners
                    .ensure_scoped(self.bus.as_ref(), &self.signal_tx, &id)?;
            }
            None => {
                self.listeners
                    .ensure_generic(self.bus.as_ref(), &self.signal_tx)?;
            }
        }
        Ok(())
    }

    fn handle_output(&mut self, raw: &str) {
        let envelope = match parse_envelope(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                // The wire is untrusted; a bad payload never stops the stream.
                warn!(error = %err, "dropping malformed stream payload");
                return;
            }
        };

        if envelope.is_system_init() {
            if let Some(session_id) = envelope.session_id.clone() {
                self.adopt_identity(&session_id);
            }
        }

        self.transcript.append(envelope);
    }

    /// One-time identity adoption: record the external id and hand the
    /// listeners off from generic to scoped. Repeated init envelopes for
    /// the same identity are no-ops.
    fn adopt_identity(&mut self, session_id: &str) {
        if self.handle.record_external_id(session_id) {
            info!(external_id = %session_id, "session identity observed");
            if let Err(err) =
                self.listeners
                    .promote(self.bus.as_ref(), &self.signal_tx, session_id)
            {
                // Generic listening stays live; the stream keeps flowing.
                warn!(error = %err, "scoped handoff failed; staying on generic channels");
            }
        } else if self.handle.external_id() != Some(session_id) {
            warn!(
                current = ?self.handle.external_id(),
                observed = %session_id,
                "observed a different session identity; ignoring (a new identity means a new handle)"
            );
        }
    }

    /// Completion dispatcher: idle → metrics → checkpoint policy →
    /// notification → queue drain. Metrics and side effects are contained;
    /// none of them can block the drain.
    async fn on_complete(&mut self, success: bool) {
        self.activity = ActivityState::Idle;
        let started_at = self.prompt_started_at.take();

        let metrics = SessionMetrics::compute(self.transcript.entries(), started_at);
        metrics.log_summary(success);

        if success && self.config.checkpoint.auto_checkpoint_enabled {
            match self
                .checkpoints
                .evaluate_auto_checkpoint(&self.handle, self.transcript.len())
                .await
            {
                Ok(created) => {
                    if created {
                        debug!("auto checkpoint created");
                    }
                }
                Err(err) => warn!(error = %err, "auto checkpoint evaluation failed"),
            }
        }

        self.notifier.session_complete(success);

        self.drain_queue().await;
    }

    /// Dispatch the next queued prompt, if any. Strictly one at a time:
    /// the next drain happens on that prompt's own completion signal. A
    /// prompt that fails to dispatch is reported and skipped so the queue
    /// can't wedge the session.
    async fn drain_queue(&mut self) {
        while let Some(next) = self.queue.pop_front() {
            match self.dispatch(&next.text, &next.model).await {
                Ok(_) => break,
                Err(err) => {
                    error!(error = %err, "failed to dispatch queued prompt; skipping it");
                    self.transcript.append(EventEnvelope::system_info(format!(
                        "Failed to send queued prompt: {err}"
                    )));
                }
            }
        }
    }

    /// Optimistic local reset shared by user-initiated cancel and the
    /// process-side cancelled signal.
    fn force_idle_after_cancel(&mut self) {
        self.activity = ActivityState::Idle;
        self.prompt_started_at = None;
        let dropped = self.queue.clear();
        self.listeners.teardown();

        let note = if dropped > 0 {
            format!("Session cancelled by user ({dropped} queued prompt(s) discarded)")
        } else {
            "Session cancelled by user".to_string()
        };
        self.transcript.append(EventEnvelope::system_info(note));
    }
}
