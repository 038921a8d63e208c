//! End-to-end flows over the in-memory bus with a scripted agent process:
//! generic→scoped handoff, queue draining, cancellation, resume fallback.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use agent_desk_coordinator::{
    ActivityState, AgentProcess, Channel, CoordinatorConfig, CoordinatorError, EventBus,
    InMemoryBus, NoopCheckpointHooks, NoopNotifier, Payload, ProcessError, ResumeOutcome,
    SessionCoordinator, StreamSignal, SubmitReceipt, Topic,
};
use agent_desk_protocol::EnvelopeKind;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Execute { prompt: String },
    Resume { external_id: String, prompt: String },
    Cancel { external_id: String },
}

/// Scripted process double: records every call, optionally rejects resumes,
/// serves canned history lines.
struct MockProcess {
    calls: Mutex<Vec<Call>>,
    reject_resume: AtomicBool,
    history: Vec<String>,
}

impl MockProcess {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reject_resume: AtomicBool::new(false),
            history: Vec::new(),
        }
    }

    fn with_history(lines: Vec<String>) -> Self {
        Self {
            history: lines,
            ..Self::new()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl AgentProcess for MockProcess {
    async fn execute(&self, _: &Path, prompt: &str, _: &str) -> Result<(), ProcessError> {
        self.record(Call::Execute {
            prompt: prompt.to_string(),
        });
        Ok(())
    }

    async fn resume(
        &self,
        _: &Path,
        external_id: &str,
        prompt: &str,
        _: &str,
    ) -> Result<(), ProcessError> {
        if self.reject_resume.load(Ordering::SeqCst) {
            return Err(ProcessError::ResumeRejected {
                external_id: external_id.to_string(),
                reason: "session expired".into(),
            });
        }
        self.record(Call::Resume {
            external_id: external_id.to_string(),
            prompt: prompt.to_string(),
        });
        Ok(())
    }

    async fn cancel(&self, external_id: &str) -> Result<(), ProcessError> {
        self.record(Call::Cancel {
            external_id: external_id.to_string(),
        });
        Ok(())
    }

    async fn load_history(&self, _: &str, _: &str) -> Result<Vec<String>, ProcessError> {
        Ok(self.history.clone())
    }
}

struct Harness {
    coordinator: SessionCoordinator,
    signals: mpsc::Receiver<StreamSignal>,
    bus: Arc<InMemoryBus>,
    process: Arc<MockProcess>,
}

impl Harness {
    fn new() -> Self {
        Self::with_parts(CoordinatorConfig::default(), MockProcess::new())
    }

    fn with_parts(config: CoordinatorConfig, process: MockProcess) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let process = Arc::new(process);
        let (coordinator, signals) = SessionCoordinator::new(
            PathBuf::from("/tmp/project"),
            config,
            bus.clone(),
            process.clone(),
            Arc::new(NoopCheckpointHooks),
            Arc::new(NoopNotifier),
        );
        Self {
            coordinator,
            signals,
            bus,
            process,
        }
    }

    /// Feed every pending signal into the coordinator, in arrival order,
    /// until the stream goes quiet.
    async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(Some(signal)) = timeout(Duration::from_millis(100), self.signals.recv()).await
        {
            self.coordinator.handle_signal(signal).await;
            handled += 1;
        }
        handled
    }

    fn publish_generic(&self, channel: Channel, payload: Payload) {
        self.bus.publish(&Topic::generic(channel), payload);
    }

    fn publish_scoped(&self, channel: Channel, external_id: &str, payload: Payload) {
        self.bus
            .publish(&Topic::scoped(channel, external_id), payload);
    }
}

fn init_line(session_id: &str) -> String {
    format!(r#"{{"type":"system","subtype":"init","session_id":"{session_id}","model":"sonnet"}}"#)
}

fn assistant_line(text: &str) -> String {
    format!(r#"{{"type":"assistant","message":{{"role":"assistant","content":"{text}"}}}}"#)
}

#[tokio::test]
async fn test_generic_to_scoped_handoff() {
    let mut h = Harness::new();

    let receipt = h.coordinator.submit("first prompt", "sonnet").await.unwrap();
    assert_eq!(
        receipt,
        SubmitReceipt::Dispatched(ResumeOutcome::StartedFresh {
            context_injected: false
        })
    );
    assert_eq!(h.coordinator.activity(), ActivityState::InFlight);
    assert!(h.coordinator.is_listening());

    // Identity arrives on the generic channel.
    h.publish_generic(Channel::Output, Payload::Raw(init_line("sess-1")));
    h.pump().await;
    assert_eq!(h.coordinator.handle().external_id(), Some("sess-1"));

    // After the handoff, scoped events flow and generic events don't.
    h.publish_scoped(Channel::Output, "sess-1", Payload::Raw(assistant_line("scoped reply")));
    h.publish_generic(Channel::Output, Payload::Raw(assistant_line("someone else's session")));
    h.pump().await;

    let visible = h.coordinator.visible();
    assert!(visible
        .iter()
        .any(|e| e.visible_text() == "scoped reply"));
    assert!(!visible
        .iter()
        .any(|e| e.visible_text() == "someone else's session"));

    // Completion on the scoped channel returns the session to idle.
    h.publish_scoped(Channel::Complete, "sess-1", Payload::Flag(true));
    h.pump().await;
    assert_eq!(h.coordinator.activity(), ActivityState::Idle);
}

#[tokio::test]
async fn test_queue_drains_in_submission_order_one_at_a_time() {
    let mut h = Harness::new();

    h.coordinator.submit("p1", "sonnet").await.unwrap();
    h.publish_generic(Channel::Output, Payload::Raw(init_line("sess-1")));
    h.pump().await;

    let r2 = h.coordinator.submit("p2", "sonnet").await.unwrap();
    let r3 = h.coordinator.submit("p3", "sonnet").await.unwrap();
    assert!(matches!(r2, SubmitReceipt::Queued { .. }));
    assert!(matches!(r3, SubmitReceipt::Queued { .. }));
    assert_eq!(h.coordinator.queued().len(), 2);

    // p1 completes: exactly p2 dispatches (as a resume), p3 stays queued.
    h.publish_scoped(Channel::Complete, "sess-1", Payload::Flag(true));
    h.pump().await;
    assert_eq!(h.coordinator.activity(), ActivityState::InFlight);
    assert_eq!(h.coordinator.queued().len(), 1);
    assert_eq!(
        h.process.calls().last().unwrap(),
        &Call::Resume {
            external_id: "sess-1".into(),
            prompt: "p2".into()
        }
    );

    // p2 completes: p3 dispatches.
    h.publish_scoped(Channel::Complete, "sess-1", Payload::Flag(true));
    h.pump().await;
    assert!(h.coordinator.queued().is_empty());
    assert_eq!(
        h.process.calls().last().unwrap(),
        &Call::Resume {
            external_id: "sess-1".into(),
            prompt: "p3".into()
        }
    );

    // p3 completes: idle, nothing more dispatched.
    let calls_before = h.process.calls().len();
    h.publish_scoped(Channel::Complete, "sess-1", Payload::Flag(true));
    h.pump().await;
    assert_eq!(h.coordinator.activity(), ActivityState::Idle);
    assert_eq!(h.process.calls().len(), calls_before);
}

#[tokio::test]
async fn test_remove_queued_prompt_before_dispatch() {
    let mut h = Harness::new();
    h.coordinator.submit("p1", "sonnet").await.unwrap();

    let receipt = h.coordinator.submit("p2", "sonnet").await.unwrap();
    let id = match receipt {
        SubmitReceipt::Queued { id } => id,
        other => panic!("expected Queued, got {other:?}"),
    };

    assert!(h.coordinator.remove_queued(&id));
    assert!(!h.coordinator.remove_queued(&id));
    assert!(h.coordinator.queued().is_empty());
}

#[tokio::test]
async fn test_queue_capacity_is_enforced() {
    let mut config = CoordinatorConfig::default();
    config.queue.max_queued = 1;
    let mut h = Harness::with_parts(config, MockProcess::new());

    h.coordinator.submit("p1", "sonnet").await.unwrap();
    h.coordinator.submit("p2", "sonnet").await.unwrap();
    let err = h.coordinator.submit("p3", "sonnet").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::QueueFull { limit: 1 }));
    assert_eq!(h.coordinator.queued().len(), 1);
}

#[tokio::test]
async fn test_cancel_clears_queue_and_records_a_note() {
    let mut h = Harness::new();
    h.coordinator.submit("p1", "sonnet").await.unwrap();
    h.publish_generic(Channel::Output, Payload::Raw(init_line("sess-1")));
    h.pump().await;
    h.coordinator.submit("p2", "sonnet").await.unwrap();

    h.coordinator.cancel().await.unwrap();

    assert_eq!(h.coordinator.activity(), ActivityState::Idle);
    assert!(h.coordinator.queued().is_empty());
    assert!(!h.coordinator.is_listening());
    assert!(h
        .process
        .calls()
        .contains(&Call::Cancel {
            external_id: "sess-1".into()
        }));

    // The synthetic note is user-visible and mentions the dropped prompt.
    let visible = h.coordinator.visible();
    let note = visible.last().unwrap();
    assert!(matches!(&note.kind, EnvelopeKind::System { subtype, .. } if subtype == "info"));
    assert!(note.visible_text().contains("cancelled"));
    assert!(note.visible_text().contains("1 queued prompt"));

    // Controls stay usable: a new submit dispatches immediately.
    let receipt = h.coordinator.submit("again", "sonnet").await.unwrap();
    assert!(matches!(receipt, SubmitReceipt::Dispatched(_)));
}

#[tokio::test]
async fn test_cancel_before_identity_still_resets_locally() {
    let mut h = Harness::new();
    h.coordinator.submit("p1", "sonnet").await.unwrap();

    // No init ever arrived, so there is no external id to cancel against.
    h.coordinator.cancel().await.unwrap();
    assert_eq!(h.coordinator.activity(), ActivityState::Idle);
    assert!(!h
        .process
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Cancel { .. })));
}

#[tokio::test]
async fn test_resume_rejection_falls_back_with_context() {
    let process = MockProcess::with_history(vec![
        r#"{"type":"user","message":{"content":"rename the struct"}}"#.into(),
        assistant_line("Renamed Config to Settings"),
    ]);
    process.reject_resume.store(true, Ordering::SeqCst);

    let bus = Arc::new(InMemoryBus::new());
    let process = Arc::new(process);
    let (mut coordinator, _signals) = SessionCoordinator::resuming(
        PathBuf::from("/tmp/project"),
        "sess-old",
        CoordinatorConfig::default(),
        bus,
        process.clone(),
        Arc::new(NoopCheckpointHooks),
        Arc::new(NoopNotifier),
    );
    coordinator.mount().await.unwrap();

    let receipt = coordinator.submit("now fix the tests", "sonnet").await.unwrap();
    assert_eq!(
        receipt,
        SubmitReceipt::Dispatched(ResumeOutcome::StartedFresh {
            context_injected: true
        })
    );

    // The rejected identity is gone; a new one will arrive from the fresh
    // process.
    assert_eq!(coordinator.handle().external_id(), None);
    assert!(coordinator.is_listening());

    // The dispatched prompt is a superset: context summary plus the
    // original text, in that order.
    let executed = process
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Execute { prompt } => Some(prompt),
            _ => None,
        })
        .expect("fallback should execute a fresh session");
    assert!(executed.contains("could not be resumed"));
    assert!(executed.contains("User: rename the struct"));
    assert!(executed.contains("Assistant: Renamed Config to Settings"));
    assert!(executed.ends_with("now fix the tests"));
}

#[tokio::test]
async fn test_resume_used_when_identity_known() {
    let process = MockProcess::new();
    let bus = Arc::new(InMemoryBus::new());
    let process = Arc::new(process);
    let (mut coordinator, _signals) = SessionCoordinator::resuming(
        PathBuf::from("/tmp/project"),
        "sess-7",
        CoordinatorConfig::default(),
        bus,
        process.clone(),
        Arc::new(NoopCheckpointHooks),
        Arc::new(NoopNotifier),
    );

    let receipt = coordinator.submit("continue", "sonnet").await.unwrap();
    assert_eq!(receipt, SubmitReceipt::Dispatched(ResumeOutcome::Resumed));
    assert_eq!(
        coordinator.handle().external_id(),
        Some("sess-7"),
        "identity survives a successful resume"
    );
    assert_eq!(
        process.calls(),
        vec![Call::Resume {
            external_id: "sess-7".into(),
            prompt: "continue".into()
        }]
    );
}

#[tokio::test]
async fn test_late_completion_signal_is_ignored() {
    let mut h = Harness::new();
    h.coordinator.submit("p1", "sonnet").await.unwrap();
    h.publish_generic(Channel::Output, Payload::Raw(init_line("sess-1")));
    h.publish_generic(Channel::Output, Payload::Raw(assistant_line("working")));
    h.pump().await;

    h.publish_scoped(Channel::Complete, "sess-1", Payload::Flag(true));
    h.pump().await;
    assert_eq!(h.coordinator.activity(), ActivityState::Idle);
    let transcript_len = h.coordinator.transcript().len();

    // A duplicate completion while idle changes nothing.
    h.publish_scoped(Channel::Complete, "sess-1", Payload::Flag(false));
    h.pump().await;
    assert_eq!(h.coordinator.activity(), ActivityState::Idle);
    assert_eq!(h.coordinator.transcript().len(), transcript_len);
}

#[tokio::test]
async fn test_late_output_still_lands_in_transcript() {
    let mut h = Harness::new();
    h.coordinator.submit("p1", "sonnet").await.unwrap();
    h.publish_generic(Channel::Output, Payload::Raw(init_line("sess-1")));
    h.pump().await;
    h.publish_scoped(Channel::Complete, "sess-1", Payload::Flag(true));
    h.pump().await;
    assert_eq!(h.coordinator.activity(), ActivityState::Idle);

    // Output arriving after completion is appended, not dropped.
    h.publish_scoped(
        Channel::Output,
        "sess-1",
        Payload::Raw(assistant_line("straggler")),
    );
    h.pump().await;
    assert!(h
        .coordinator
        .visible()
        .iter()
        .any(|e| e.visible_text() == "straggler"));
}

#[tokio::test]
async fn test_process_error_becomes_visible_envelope() {
    let mut h = Harness::new();
    h.coordinator.submit("p1", "sonnet").await.unwrap();
    h.publish_generic(Channel::Error, Payload::Raw("spawn failed: ENOENT".into()));
    h.pump().await;

    let visible = h.coordinator.visible();
    assert!(visible.iter().any(|e| matches!(
        &e.kind,
        EnvelopeKind::Error { message } if message.contains("ENOENT")
    )));
}

#[tokio::test]
async fn test_malformed_payload_does_not_stop_the_stream() {
    let mut h = Harness::new();
    h.coordinator.submit("p1", "sonnet").await.unwrap();

    h.publish_generic(Channel::Output, Payload::Raw("{broken json".into()));
    h.publish_generic(Channel::Output, Payload::Raw(assistant_line("still here")));
    h.pump().await;

    assert!(h
        .coordinator
        .visible()
        .iter()
        .any(|e| e.visible_text() == "still here"));
}

#[tokio::test]
async fn test_duplicate_init_is_idempotent() {
    let mut h = Harness::new();
    h.coordinator.submit("p1", "sonnet").await.unwrap();

    h.publish_generic(Channel::Output, Payload::Raw(init_line("sess-1")));
    h.pump().await;
    // The same init again, now on the scoped channel.
    h.publish_scoped(Channel::Output, "sess-1", Payload::Raw(init_line("sess-1")));
    h.pump().await;

    assert_eq!(h.coordinator.handle().external_id(), Some("sess-1"));

    // A different identity is ignored, not adopted.
    h.publish_scoped(Channel::Output, "sess-1", Payload::Raw(init_line("sess-2")));
    h.pump().await;
    assert_eq!(h.coordinator.handle().external_id(), Some("sess-1"));
}
