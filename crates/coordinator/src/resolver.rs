// crates/coordinator/src/resolver.rs
//! Session identity resolution: resume vs. start fresh.
//!
//! Resume-with-fallback is a heuristic recovery strategy, not a guarantee
//! of semantic continuity, so the outcome is an explicit enum rather than
//! something callers infer from side effects.

use agent_desk_protocol::EnvelopeKind;

use crate::session::SessionHandle;
use crate::transcript::Transcript;

/// How many characters of each prior message make it into the fallback
/// summary. Enough to anchor the conversation, short enough to not crowd
/// out the new prompt.
const SUMMARY_SNIPPET_LEN: usize = 200;

/// How a prompt ended up running against the external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The existing external session accepted the prompt.
    Resumed,
    /// A fresh session was started. `context_injected` is true when a
    /// summary of the prior exchanges was prepended to the prompt.
    StartedFresh { context_injected: bool },
}

/// A session is resumed when it already has an external identity, or when
/// there has been prior activity in this view even if identity capture
/// hasn't happened yet.
pub fn should_resume(handle: &SessionHandle, transcript: &Transcript) -> bool {
    handle.external_id().is_some() || !transcript.is_empty()
}

/// Compact textual summary of the prior user/assistant exchange pairs, for
/// re-seeding a fresh session after a rejected resume. `None` when the
/// transcript holds no user-visible exchange.
pub fn summarize_exchanges(transcript: &Transcript) -> Option<String> {
    let mut lines = Vec::new();
    for envelope in transcript.entries() {
        let role = match &envelope.kind {
            EnvelopeKind::User { .. } => "User",
            EnvelopeKind::Assistant { .. } => "Assistant",
            _ => continue,
        };
        let text = envelope.visible_text();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        lines.push(format!("{role}: {}", snippet(text)));
    }
    if lines.is_empty() {
        return None;
    }
    Some(format!(
        "Context from our previous conversation (the session could not be resumed):\n{}",
        lines.join("\n")
    ))
}

/// The prompt actually sent when falling back to a fresh session: the
/// summary, then the user's original prompt, which is always a superset of
/// what the user typed.
pub fn prompt_with_context(summary: &str, prompt: &str) -> String {
    format!("{summary}\n\n{prompt}")
}

fn snippet(text: &str) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= SUMMARY_SNIPPET_LEN {
        return flattened;
    }
    let cut: String = flattened.chars().take(SUMMARY_SNIPPET_LEN).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_desk_protocol::EventEnvelope;
    use std::path::PathBuf;

    fn handle() -> SessionHandle {
        SessionHandle::new(PathBuf::from("/tmp/project"))
    }

    #[test]
    fn test_should_resume_with_external_id() {
        let mut h = handle();
        assert!(!should_resume(&h, &Transcript::new()));
        assert!(h.record_external_id("sess-1"));
        assert!(should_resume(&h, &Transcript::new()));
    }

    #[test]
    fn test_should_resume_with_prior_activity() {
        let mut transcript = Transcript::new();
        transcript.append(EventEnvelope::user_text("hello"));
        assert!(should_resume(&handle(), &transcript));
    }

    #[test]
    fn test_summary_covers_both_exchange_pairs() {
        let mut transcript = Transcript::new();
        transcript.append(EventEnvelope::user_text("rename the struct"));
        transcript.append(EventEnvelope::assistant_text("Renamed Config to Settings"));
        transcript.append(EventEnvelope::user_text("now fix the tests"));
        transcript.append(EventEnvelope::assistant_text("Updated 4 test files"));
        transcript.append(EventEnvelope::system_init("sess-1")); // not part of the summary

        let summary = summarize_exchanges(&transcript).unwrap();
        assert!(summary.contains("User: rename the struct"));
        assert!(summary.contains("Assistant: Renamed Config to Settings"));
        assert!(summary.contains("User: now fix the tests"));
        assert!(summary.contains("Assistant: Updated 4 test files"));
        assert!(!summary.contains("sess-1"));
    }

    #[test]
    fn test_summary_none_for_empty_or_invisible_transcript() {
        assert_eq!(summarize_exchanges(&Transcript::new()), None);

        let mut transcript = Transcript::new();
        transcript.append(EventEnvelope::system_init("sess-1"));
        assert_eq!(summarize_exchanges(&transcript), None);
    }

    #[test]
    fn test_long_messages_are_truncated() {
        let mut transcript = Transcript::new();
        transcript.append(EventEnvelope::user_text("x".repeat(1000)));
        let summary = summarize_exchanges(&transcript).unwrap();
        assert!(summary.len() < 400);
        assert!(summary.contains('…'));
    }

    #[test]
    fn test_prompt_with_context_is_a_superset() {
        let combined = prompt_with_context("Context: prior work", "do the next step");
        assert!(combined.contains("Context: prior work"));
        assert!(combined.ends_with("do the next step"));
    }
}
