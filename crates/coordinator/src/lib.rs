// crates/coordinator/src/lib.rs
//! Session Stream Coordinator.
//!
//! Reconstructs a coherent conversation from the out-of-order pub/sub event
//! stream of an external CLI coding agent, while the user may submit new
//! prompts, cancel execution, or close the session view at any time.
//!
//! The moving parts, leaves first:
//! - [`bus`] — channel naming and the pub/sub transport seam.
//! - [`listener`] — generic→scoped subscription handoff as an explicit
//!   state machine.
//! - [`transcript`] — append-only event record plus a pure, deduplicating
//!   display projection.
//! - [`queue`] — FIFO of prompts waiting for their turn; exactly one
//!   prompt is ever in flight.
//! - [`session`] — the coordinator that owns all of the above and reacts
//!   to completion/cancellation signals.

pub mod bus;
pub mod config;
pub mod error;
pub mod hooks;
pub mod listener;
pub mod metrics;
pub mod process;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod transcript;

pub use bus::*;
pub use config::*;
pub use error::*;
pub use hooks::*;
pub use listener::*;
pub use metrics::*;
pub use process::*;
pub use queue::*;
pub use resolver::*;
pub use session::*;
pub use transcript::*;
