// crates/coordinator/src/transcript.rs
//! Append-only transcript plus the deduplicating display projection.
//!
//! Storage and display are deliberately split: the stored transcript is a
//! faithful, replayable record in arrival order (needed for checkpointing
//! and export), while the visible projection is a pure function computed
//! on read that suppresses the near-duplicates the agent process produces
//! through its own redundant reporting — e.g. an assistant turn whose text
//! is re-emitted verbatim inside the terminal result event.

use agent_desk_protocol::{ContentBlock, EnvelopeKind, EventEnvelope};

use crate::config::DedupConfig;

/// The ordered event record for one session handle. Envelopes are kept in
/// arrival order; no reordering, no in-place mutation.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<EventEnvelope>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an envelope unconditionally. Display filtering happens on read.
    pub fn append(&mut self, envelope: EventEnvelope) {
        self.entries.push(envelope);
    }

    /// Seed from persisted history on session-view mount.
    pub fn seed(&mut self, entries: impl IntoIterator<Item = EventEnvelope>) {
        self.entries.extend(entries);
    }

    pub fn entries(&self) -> &[EventEnvelope] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The user-facing view of this transcript. Pure and idempotent: same
    /// entries and config always produce the same output, and the stored
    /// entries are never touched.
    pub fn visible_projection(
        &self,
        config: &DedupConfig,
        surfaced_tools: &[String],
    ) -> Vec<EventEnvelope> {
        visible_projection(&self.entries, config, surfaced_tools)
    }
}

/// Compute the visible projection of an envelope sequence.
pub fn visible_projection(
    entries: &[EventEnvelope],
    config: &DedupConfig,
    surfaced_tools: &[String],
) -> Vec<EventEnvelope> {
    let mut visible = Vec::with_capacity(entries.len());
    // tool_use id -> tool name, accumulated from prior envelopes only.
    let mut tool_names = std::collections::HashMap::new();

    for (i, envelope) in entries.iter().enumerate() {
        let keep = match &envelope.kind {
            // Init events carry no user-meaningful content; they stay in
            // storage for identity resolution only.
            EnvelopeKind::System { subtype, .. } if subtype == "init" => false,
            EnvelopeKind::Assistant { .. } => {
                !assistant_echoed_later(envelope, &entries[i + 1..], config)
            }
            EnvelopeKind::Result { .. } => {
                !result_superseded_later(envelope, &entries[i + 1..], config)
            }
            EnvelopeKind::User { .. } if envelope.is_tool_result_only() => {
                !tool_results_all_surfaced(envelope, &tool_names, surfaced_tools)
            }
            _ => true,
        };

        if keep {
            visible.push(envelope.clone());
        }

        for (id, name) in envelope.tool_uses() {
            if let Some(id) = id {
                tool_names.insert(id.to_string(), name.to_lowercase());
            }
        }
    }

    visible
}

/// Does a later result (or tool-result echo) duplicate this assistant turn
/// within the lookahead window?
fn assistant_echoed_later(
    assistant: &EventEnvelope,
    later: &[EventEnvelope],
    config: &DedupConfig,
) -> bool {
    let text = assistant.visible_text();
    later
        .iter()
        .take(config.lookahead_window)
        .any(|candidate| match &candidate.kind {
            EnvelopeKind::Result { .. } => {
                is_duplicate_text(&text, &candidate.visible_text(), config)
            }
            EnvelopeKind::User { .. } if !candidate.tool_result_blocks().is_empty() => {
                is_duplicate_text(&text, &candidate.visible_text(), config)
            }
            _ => false,
        })
}

/// Among consecutive results, suppress an earlier one only on a near-exact
/// match with a later one — distinct results are legitimately distinct.
fn result_superseded_later(
    result: &EventEnvelope,
    later: &[EventEnvelope],
    config: &DedupConfig,
) -> bool {
    let text = result.visible_text();
    later
        .iter()
        .take(config.lookahead_window)
        .any(|candidate| match &candidate.kind {
            EnvelopeKind::Result { .. } => {
                is_near_exact(&text, &candidate.visible_text(), config)
            }
            _ => false,
        })
}

/// A tool-result-only user envelope is suppressed when every contained
/// result either has no visible text or belongs to a tool that already
/// renders a dedicated summary widget.
fn tool_results_all_surfaced(
    envelope: &EventEnvelope,
    tool_names: &std::collections::HashMap<String, String>,
    surfaced_tools: &[String],
) -> bool {
    envelope.tool_result_blocks().iter().all(|block| {
        let ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } = block
        else {
            return false;
        };
        let text = content
            .as_ref()
            .map(agent_desk_protocol::value_visible_text)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return true;
        }
        tool_use_id
            .as_deref()
            .and_then(|id| tool_names.get(id))
            .map(|name| surfaced_tools.iter().any(|t| t.eq_ignore_ascii_case(name)))
            .unwrap_or(false)
    })
}

/// Case- and whitespace-insensitive canonical form used for comparison.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Token-overlap similarity in `[0, 1]`.
fn similarity(a: &str, b: &str) -> f32 {
    similar::TextDiff::from_words(a, b).ratio()
}

/// The general duplicate rule: identical, containment, or high token
/// overlap — but never for texts under the minimum length, where the
/// heuristic produced visible false positives.
fn is_duplicate_text(a: &str, b: &str, config: &DedupConfig) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.len() < config.min_match_len || b.len() < config.min_match_len {
        return false;
    }
    if a == b || a.contains(&b) || b.contains(&a) {
        return true;
    }
    similarity(&a, &b) >= config.similarity_threshold
}

/// The stricter result-vs-result rule: near-exact only.
fn is_near_exact(a: &str, b: &str, config: &DedupConfig) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.len() < config.min_match_len || b.len() < config.min_match_len {
        return false;
    }
    a == b || similarity(&a, &b) >= config.result_similarity_threshold
}
