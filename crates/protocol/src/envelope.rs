// crates/protocol/src/envelope.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token counts reported by the agent process for a single turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read_tokens + self.cache_creation_tokens
    }

    /// Fold another turn's counts into this accumulator.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
    }
}

/// One block of message content inside an assistant or user envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Option<serde_json::Value>,
        #[serde(default)]
        is_error: bool,
    },
    /// Forward-compat: block types we don't recognize yet.
    #[serde(other)]
    Other,
}

/// Kind-specific payload of an [`EventEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Process housekeeping. `subtype == "init"` carries the session identity.
    System {
        subtype: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Assistant {
        blocks: Vec<ContentBlock>,
    },
    User {
        blocks: Vec<ContentBlock>,
    },
    /// A standalone tool invocation event (some agents emit these outside
    /// of message content).
    ToolUse {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        content: Option<serde_json::Value>,
        #[serde(default)]
        is_error: bool,
    },
    /// Terminal per-prompt outcome reported by the process.
    Result {
        subtype: String,
        is_error: bool,
        text: String,
    },
    Error {
        message: String,
    },
    /// Structurally valid payload with a `type` we don't recognize.
    /// Preserved so newer agent versions don't break the stream.
    Unknown {
        raw_kind: String,
    },
}

/// One parsed unit of the event stream. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub kind: EnvelopeKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl EventEnvelope {
    pub fn new(kind: EnvelopeKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            session_id: None,
            usage: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Synthetic `System/init` envelope announcing a session identity.
    pub fn system_init(session_id: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::System {
            subtype: "init".into(),
            note: None,
        })
        .with_session_id(session_id)
    }

    /// Synthetic `System/info` envelope with a user-visible note.
    pub fn system_info(note: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::System {
            subtype: "info".into(),
            note: Some(note.into()),
        })
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::User {
            blocks: vec![ContentBlock::Text { text: text.into() }],
        })
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Assistant {
            blocks: vec![ContentBlock::Text { text: text.into() }],
        })
    }

    pub fn result_text(text: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Result {
            subtype: "success".into(),
            is_error: false,
            text: text.into(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Error {
            message: message.into(),
        })
    }

    /// True for `System` envelopes with the `init` subtype.
    pub fn is_system_init(&self) -> bool {
        matches!(&self.kind, EnvelopeKind::System { subtype, .. } if subtype == "init")
    }

    /// The text a user would see for this envelope, with tool plumbing
    /// (thinking, tool_use inputs) stripped. Empty for non-textual kinds.
    pub fn visible_text(&self) -> String {
        match &self.kind {
            EnvelopeKind::System { note, .. } => note.clone().unwrap_or_default(),
            EnvelopeKind::Assistant { blocks } | EnvelopeKind::User { blocks } => {
                let mut parts = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => parts.push(text.clone()),
                        ContentBlock::ToolResult { content, .. } => {
                            let text = content.as_ref().map(value_visible_text).unwrap_or_default();
                            if !text.is_empty() {
                                parts.push(text);
                            }
                        }
                        _ => {}
                    }
                }
                parts.join("\n")
            }
            EnvelopeKind::ToolUse { .. } => String::new(),
            EnvelopeKind::ToolResult { content, .. } => {
                content.as_ref().map(value_visible_text).unwrap_or_default()
            }
            EnvelopeKind::Result { text, .. } => text.clone(),
            EnvelopeKind::Error { message } => message.clone(),
            EnvelopeKind::Unknown { .. } => String::new(),
        }
    }

    /// `(id, name)` pairs of tool invocations carried by this envelope.
    pub fn tool_uses(&self) -> Vec<(Option<&str>, &str)> {
        match &self.kind {
            EnvelopeKind::Assistant { blocks } | EnvelopeKind::User { blocks } => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, .. } => Some((id.as_deref(), name.as_str())),
                    _ => None,
                })
                .collect(),
            EnvelopeKind::ToolUse { name, .. } => vec![(None, name.as_str())],
            _ => Vec::new(),
        }
    }

    /// Tool-result blocks carried by this envelope (user envelopes echo
    /// tool output back to the process this way).
    pub fn tool_result_blocks(&self) -> Vec<&ContentBlock> {
        match &self.kind {
            EnvelopeKind::User { blocks } | EnvelopeKind::Assistant { blocks } => blocks
                .iter()
                .filter(|block| matches!(block, ContentBlock::ToolResult { .. }))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True for `User` envelopes whose content is tool results and nothing else.
    pub fn is_tool_result_only(&self) -> bool {
        match &self.kind {
            EnvelopeKind::User { blocks } => {
                !blocks.is_empty()
                    && blocks
                        .iter()
                        .all(|block| matches!(block, ContentBlock::ToolResult { .. }))
            }
            _ => false,
        }
    }
}

/// Extract display text from a tool-result `content` value, which the wire
/// carries either as a plain string or as an array of text blocks.
pub fn value_visible_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => {
            let mut parts = Vec::new();
            for item in items {
                if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                    if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                        parts.push(text.to_string());
                    }
                }
            }
            parts.join("\n")
        }
        serde_json::Value::Object(map) => map
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .unwrap_or_default(),
        _ => String::new(),
    }
}
