// crates/protocol/src/parser.rs
//! Tolerant parser for raw stream payloads.
//!
//! The wire is untrusted: a malformed payload becomes a [`ParseError`]
//! value (never a panic, never an aborted stream), and a structurally
//! valid payload whose `type` we don't recognize becomes
//! [`EnvelopeKind::Unknown`] so newer agent versions keep working.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::envelope::{ContentBlock, EnvelopeKind, EventEnvelope, TokenUsage};
use crate::error::ParseError;

/// Parse one raw transport payload into an [`EventEnvelope`].
pub fn parse_envelope(raw: &str) -> Result<EventEnvelope, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| ParseError::MalformedJson {
        message: e.to_string(),
    })?;
    let obj = value.as_object().ok_or(ParseError::NotAnObject)?;
    let raw_kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingKind)?;

    let kind = match raw_kind {
        "system" => EnvelopeKind::System {
            subtype: obj
                .get("subtype")
                .and_then(Value::as_str)
                .unwrap_or("info")
                .to_string(),
            note: obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        "assistant" => EnvelopeKind::Assistant {
            blocks: message_blocks(obj),
        },
        "user" => EnvelopeKind::User {
            blocks: message_blocks(obj),
        },
        "tool_use" => EnvelopeKind::ToolUse {
            name: obj
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ParseError::missing_field("tool_use", "name"))?
                .to_string(),
            input: obj.get("input").cloned().unwrap_or(Value::Null),
        },
        "tool_result" => EnvelopeKind::ToolResult {
            content: obj.get("content").cloned(),
            is_error: obj
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
        "result" => EnvelopeKind::Result {
            subtype: obj
                .get("subtype")
                .and_then(Value::as_str)
                .unwrap_or("success")
                .to_string(),
            is_error: obj
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            text: obj
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        },
        "error" => EnvelopeKind::Error {
            message: obj
                .get("error")
                .or_else(|| obj.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        },
        other => EnvelopeKind::Unknown {
            raw_kind: other.to_string(),
        },
    };

    Ok(EventEnvelope {
        kind,
        timestamp: payload_timestamp(obj),
        session_id: payload_session_id(obj),
        usage: payload_usage(obj),
    })
}

/// Content blocks from `message.content`, which the wire carries either as
/// a plain string or as an array of typed blocks.
fn message_blocks(obj: &serde_json::Map<String, Value>) -> Vec<ContentBlock> {
    let content = match obj.get("message").and_then(|m| m.get("content")) {
        Some(c) => c,
        None => return Vec::new(),
    };
    match content {
        Value::String(text) => vec![ContentBlock::Text { text: text.clone() }],
        Value::Array(items) => items
            .iter()
            .map(|item| {
                serde_json::from_value::<ContentBlock>(item.clone())
                    .unwrap_or(ContentBlock::Other)
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn payload_session_id(obj: &serde_json::Map<String, Value>) -> Option<String> {
    obj.get("session_id")
        .or_else(|| obj.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Wire timestamp when present and valid RFC 3339, otherwise arrival time.
fn payload_timestamp(obj: &serde_json::Map<String, Value>) -> DateTime<Utc> {
    obj.get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Token usage lives either at the top level (result events) or under
/// `message.usage` (assistant turns).
fn payload_usage(obj: &serde_json::Map<String, Value>) -> Option<TokenUsage> {
    let usage = obj
        .get("usage")
        .or_else(|| obj.get("message").and_then(|m| m.get("usage")))?;
    let count = |names: &[&str]| -> u64 {
        names
            .iter()
            .find_map(|name| usage.get(*name).and_then(Value::as_u64))
            .unwrap_or(0)
    };
    Some(TokenUsage {
        input_tokens: count(&["input_tokens"]),
        output_tokens: count(&["output_tokens"]),
        cache_read_tokens: count(&["cache_read_input_tokens", "cache_read_tokens"]),
        cache_creation_tokens: count(&["cache_creation_input_tokens", "cache_creation_tokens"]),
    })
}
