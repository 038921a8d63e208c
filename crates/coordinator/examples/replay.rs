//! Drive a coordinator against a scripted agent process and print the
//! visible transcript projection.
//!
//! Run with: cargo run -p agent-desk-coordinator --example replay

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::timeout;

use agent_desk_coordinator::{
    AgentProcess, Channel, CoordinatorConfig, EventBus, InMemoryBus, NoopCheckpointHooks,
    NoopNotifier, Payload, ProcessError, SessionCoordinator, Topic,
};
use agent_desk_protocol::EnvelopeKind;

/// Publishes a canned event stream the way a real agent process would.
/// Everything goes out on the generic channels: at publish time the
/// coordinator has not yet seen the init, so scoped subscriptions don't
/// exist yet.
struct ScriptedProcess {
    bus: Arc<InMemoryBus>,
}

impl ScriptedProcess {
    fn publish(&self, channel: Channel, payload: Payload) {
        self.bus.publish(&Topic::generic(channel), payload);
    }
}

#[async_trait]
impl AgentProcess for ScriptedProcess {
    async fn execute(&self, _: &Path, prompt: &str, _: &str) -> Result<(), ProcessError> {
        self.publish(
            Channel::Output,
            Payload::Raw(
                r#"{"type":"system","subtype":"init","session_id":"sess-demo","model":"sonnet"}"#
                    .into(),
            ),
        );
        self.publish(
            Channel::Output,
            Payload::Raw(format!(
                r#"{{"type":"assistant","message":{{"content":"Working on: {prompt}"}}}}"#
            )),
        );
        self.publish(
            Channel::Output,
            Payload::Raw(
                r#"{"type":"result","subtype":"success","result":"All done.","usage":{"input_tokens":42,"output_tokens":7}}"#
                    .into(),
            ),
        );
        self.publish(Channel::Complete, Payload::Flag(true));
        Ok(())
    }

    async fn resume(&self, path: &Path, _: &str, prompt: &str, model: &str) -> Result<(), ProcessError> {
        self.execute(path, prompt, model).await
    }

    async fn cancel(&self, _: &str) -> Result<(), ProcessError> {
        Ok(())
    }

    async fn load_history(&self, _: &str, _: &str) -> Result<Vec<String>, ProcessError> {
        Ok(Vec::new())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let bus = Arc::new(InMemoryBus::new());
    let process = Arc::new(ScriptedProcess { bus: bus.clone() });
    let (mut coordinator, mut signals) = SessionCoordinator::new(
        PathBuf::from("."),
        CoordinatorConfig::default(),
        bus,
        process,
        Arc::new(NoopCheckpointHooks),
        Arc::new(NoopNotifier),
    );

    coordinator.submit("summarize this project", "sonnet").await?;

    while let Ok(Some(signal)) = timeout(Duration::from_millis(200), signals.recv()).await {
        coordinator.handle_signal(signal).await;
    }

    println!("session: {:?}", coordinator.handle().external_id());
    println!("--- visible transcript ---");
    for envelope in coordinator.visible() {
        let role = match &envelope.kind {
            EnvelopeKind::System { subtype, .. } => format!("system/{subtype}"),
            EnvelopeKind::Assistant { .. } => "assistant".into(),
            EnvelopeKind::User { .. } => "user".into(),
            EnvelopeKind::Result { .. } => "result".into(),
            EnvelopeKind::Error { .. } => "error".into(),
            other => format!("{other:?}"),
        };
        println!("[{role}] {}", envelope.visible_text());
    }

    coordinator.teardown().await;
    Ok(())
}
