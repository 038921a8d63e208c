// crates/protocol/src/lib.rs
//! Wire data model for the external coding agent's event stream.
//!
//! One stream payload parses into one [`EventEnvelope`]. Envelopes are
//! immutable once constructed; everything downstream (transcript, display
//! projection, metrics) treats them as values.

pub mod envelope;
pub mod error;
pub mod parser;

pub use envelope::*;
pub use error::*;
pub use parser::*;
