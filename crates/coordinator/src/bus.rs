// crates/coordinator/src/bus.rs
//! Pub/sub transport seam.
//!
//! The external agent process publishes events on named channels. Channel
//! names follow the `<name>` / `<name>:<external_id>` convention: the
//! generic form is shared by every concurrently-running process on the
//! host, the scoped form is namespaced by one session's external identity.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::error::SubscriptionError;

/// Default broadcast capacity per channel. A slow consumer past this many
/// pending events starts lagging (observed and logged by the listener).
const CHANNEL_CAPACITY: usize = 256;

/// The four channels every agent process publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// One raw stream payload per message.
    Output,
    /// A raw error string.
    Error,
    /// A boolean success flag; the in-flight prompt is finished.
    Complete,
    /// Operator-initiated cancellation completed.
    Cancelled,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Output,
        Channel::Error,
        Channel::Complete,
        Channel::Cancelled,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Channel::Output => "output",
            Channel::Error => "error",
            Channel::Complete => "complete",
            Channel::Cancelled => "cancelled",
        }
    }
}

/// A fully-qualified channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Unscoped channel shared by all running agent processes.
    pub fn generic(channel: Channel) -> Self {
        Self(channel.suffix().to_string())
    }

    /// Channel namespaced by one session's external identity.
    pub fn scoped(channel: Channel, external_id: &str) -> Self {
        Self(format!("{}:{}", channel.suffix(), external_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What travels on a channel: raw payloads on output/error, flags on
/// complete/cancelled.
#[derive(Debug, Clone)]
pub enum Payload {
    Raw(String),
    Flag(bool),
}

/// The transport the coordinator subscribes through. The desktop shell
/// implements this over its native event system; tests and the demo use
/// [`InMemoryBus`].
pub trait EventBus: Send + Sync {
    fn subscribe(&self, topic: &Topic) -> Result<broadcast::Receiver<Payload>, SubscriptionError>;

    fn publish(&self, topic: &Topic, payload: Payload);
}

/// In-memory bus backed by one tokio broadcast channel per topic.
pub struct InMemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<Payload>>>,
    capacity: usize,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn sender_for(&self, topic: &Topic) -> broadcast::Sender<Payload> {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        channels
            .entry(topic.as_str().to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryBus {
    fn subscribe(&self, topic: &Topic) -> Result<broadcast::Receiver<Payload>, SubscriptionError> {
        Ok(self.sender_for(topic).subscribe())
    }

    fn publish(&self, topic: &Topic, payload: Payload) {
        // send() errors only when there are no receivers; events published
        // before anyone listens are dropped.
        let _ = self.sender_for(topic).send(payload);
    }
}
