// crates/protocol/src/error.rs
use thiserror::Error;

/// Errors produced while parsing a raw stream payload.
///
/// Parse failures are always contained by the caller: the offending payload
/// is logged and skipped, and the stream continues.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty stream payload")]
    Empty,

    #[error("malformed JSON in stream payload: {message}")]
    MalformedJson { message: String },

    #[error("stream payload is not a JSON object")]
    NotAnObject,

    #[error("stream payload has no \"type\" field")]
    MissingKind,

    #[error("\"{kind}\" payload missing required field \"{field}\"")]
    MissingField { kind: String, field: String },
}

impl ParseError {
    pub fn missing_field(kind: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            kind: kind.into(),
            field: field.into(),
        }
    }
}
