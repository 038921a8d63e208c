// crates/coordinator/src/config.rs
//! Coordinator configuration.
//!
//! The dedup thresholds are a product decision, not a technical constraint:
//! they were tuned against real agent transcripts and are deliberately
//! exposed as configuration rather than constants.

use serde::Deserialize;

/// Thresholds for the display-projection deduplication heuristic.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Normalized texts shorter than this are never dedup-suppressed.
    /// Suppressing short strings ("ok", "done") caused visible false
    /// positives in practice.
    pub min_match_len: usize,
    /// Token-overlap score at or above which an assistant turn counts as
    /// duplicated by a later result/tool-result echo.
    pub similarity_threshold: f32,
    /// Stricter cutoff applied between consecutive result envelopes, so
    /// legitimately distinct results are not discarded.
    pub result_similarity_threshold: f32,
    /// How many subsequent envelopes to scan for an echo.
    pub lookahead_window: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            min_match_len: 10,
            similarity_threshold: 0.87,
            result_similarity_threshold: 0.95,
            lookahead_window: 3,
        }
    }
}

/// Checkpoint policy knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// When true, a successful completion asks the checkpoint hooks to
    /// evaluate whether a new snapshot is due.
    pub auto_checkpoint_enabled: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            auto_checkpoint_enabled: true,
        }
    }
}

/// Prompt queue bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of prompts waiting behind the in-flight one.
    pub max_queued: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_queued: 64 }
    }
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub dedup: DedupConfig,
    pub checkpoint: CheckpointConfig,
    pub queue: QueueConfig,
    /// Tool names that already render a dedicated summary widget in the
    /// session view. A tool-result-only user envelope whose every entry
    /// names one of these is suppressed from the visible projection.
    pub surfaced_tools: Vec<String>,
}

impl CoordinatorConfig {
    pub fn surfaced_tools_or_default(&self) -> Vec<String> {
        if self.surfaced_tools.is_empty() {
            default_surfaced_tools()
        } else {
            self.surfaced_tools.clone()
        }
    }
}

/// Tools the session view renders as dedicated widgets.
pub fn default_surfaced_tools() -> Vec<String> {
    ["read", "edit", "write", "bash", "glob", "grep", "ls", "todowrite", "task"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
