// crates/coordinator/src/metrics.rs
//! Session-level metrics computed on completion.
//!
//! A pure, infallible read over the transcript — the completion dispatcher
//! logs the summary and moves on, and nothing downstream depends on it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::info;

use agent_desk_protocol::{EnvelopeKind, EventEnvelope, TokenUsage};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    /// Wall-clock seconds between dispatch and completion, when known.
    pub duration_secs: Option<i64>,
    pub message_count: usize,
    pub user_turns: usize,
    pub assistant_turns: usize,
    /// Invocation count per tool name (lowercased).
    pub tool_counts: HashMap<String, usize>,
    pub tokens: TokenUsage,
}

impl SessionMetrics {
    /// Compute metrics over the transcript entries.
    pub fn compute(entries: &[EventEnvelope], started_at: Option<DateTime<Utc>>) -> Self {
        let mut metrics = SessionMetrics {
            message_count: entries.len(),
            ..Default::default()
        };
        for envelope in entries {
            match &envelope.kind {
                EnvelopeKind::User { .. } if !envelope.is_tool_result_only() => {
                    metrics.user_turns += 1;
                }
                EnvelopeKind::Assistant { .. } => metrics.assistant_turns += 1,
                _ => {}
            }
            for (_, name) in envelope.tool_uses() {
                *metrics.tool_counts.entry(name.to_lowercase()).or_insert(0) += 1;
            }
            if let Some(usage) = &envelope.usage {
                metrics.tokens.accumulate(usage);
            }
        }
        metrics.duration_secs =
            started_at.map(|start| (Utc::now() - start).num_seconds().max(0));
        metrics
    }

    pub fn total_tool_calls(&self) -> usize {
        self.tool_counts.values().sum()
    }

    /// One structured summary line per completed prompt.
    pub fn log_summary(&self, success: bool) {
        info!(
            success,
            duration_secs = self.duration_secs,
            messages = self.message_count,
            user_turns = self.user_turns,
            assistant_turns = self.assistant_turns,
            tool_calls = self.total_tool_calls(),
            tokens_total = self.tokens.total(),
            "prompt completed"
        );
    }
}
