// crates/coordinator/src/listener.rs
//! Listener lifecycle: generic→scoped subscription handoff.
//!
//! A session's external identity is not known at subscription time, so the
//! coordinator first listens on the generic channel set shared by every
//! running agent process, then — once a `System/init` envelope reveals the
//! identity — hands off to the channel set scoped to that session. The
//! handoff subscribes the scoped set *before* dropping the generic one, so
//! there is no gap; an event delivered on both sets during that narrow
//! window is a harmless duplicate.
//!
//! The lifecycle is an explicit tagged union with guarded transitions.
//! Exactly one listener set is live per session handle at any time.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{Channel, EventBus, Payload, Topic};
use crate::error::SubscriptionError;

/// One decoded event from the active channel set, in arrival order.
#[derive(Debug, Clone)]
pub enum StreamSignal {
    /// A raw stream payload from the `output` channel.
    Output(String),
    /// A raw error string from the `error` channel.
    ProcessError(String),
    /// The in-flight prompt finished; the flag is the success state.
    Complete(bool),
    /// Operator-initiated cancellation completed on the process side.
    Cancelled(bool),
}

/// The live subscriptions for one scope. Dropping the set via
/// [`ListenerSet::unsubscribe`] aborts the forwarder tasks.
pub struct ListenerSet {
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerSet {
    /// Subscribe all four channels for the given scope and forward their
    /// events into `tx`. On a mid-way subscription failure every channel
    /// already subscribed is torn down again — a set is all-or-nothing.
    fn subscribe(
        bus: &dyn EventBus,
        scope: Option<&str>,
        tx: mpsc::Sender<StreamSignal>,
    ) -> Result<Self, SubscriptionError> {
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            let topic = match scope {
                None => Topic::generic(channel),
                Some(id) => Topic::scoped(channel, id),
            };
            let rx = match bus.subscribe(&topic) {
                Ok(rx) => rx,
                Err(err) => {
                    for task in tasks {
                        task.abort();
                    }
                    return Err(err);
                }
            };
            tasks.push(tokio::spawn(forward(channel, topic, rx, tx.clone())));
        }
        Ok(Self { tasks })
    }

    fn unsubscribe(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Forward events from one channel subscription into the coordinator's
/// signal queue until either side closes.
async fn forward(
    channel: Channel,
    topic: Topic,
    mut rx: broadcast::Receiver<Payload>,
    tx: mpsc::Sender<StreamSignal>,
) {
    loop {
        match rx.recv().await {
            Ok(payload) => {
                let signal = match (channel, payload) {
                    (Channel::Output, Payload::Raw(raw)) => StreamSignal::Output(raw),
                    (Channel::Error, Payload::Raw(raw)) => StreamSignal::ProcessError(raw),
                    (Channel::Complete, Payload::Flag(success)) => StreamSignal::Complete(success),
                    (Channel::Cancelled, Payload::Flag(flag)) => StreamSignal::Cancelled(flag),
                    (_, payload) => {
                        warn!(topic = %topic, ?payload, "unexpected payload shape on channel; skipped");
                        continue;
                    }
                };
                if tx.send(signal).await.is_err() {
                    // Coordinator side closed; nothing left to forward to.
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(topic = %topic, skipped, "listener lagging; stream events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Where this session's subscriptions currently stand.
pub enum ListenerLifecycle {
    /// No live subscriptions.
    Unsubscribed,
    /// Listening on the generic channel set; identity not yet known.
    GenericActive(ListenerSet),
    /// Listening on the channel set scoped to a known external identity.
    /// Monotonic: once scoped, a handle never reverts to generic.
    ScopedActive {
        external_id: String,
        set: ListenerSet,
    },
}

impl ListenerLifecycle {
    pub fn is_listening(&self) -> bool {
        !matches!(self, ListenerLifecycle::Unsubscribed)
    }

    pub fn scoped_id(&self) -> Option<&str> {
        match self {
            ListenerLifecycle::ScopedActive { external_id, .. } => Some(external_id),
            _ => None,
        }
    }

    /// Subscribe the generic set if nothing is live yet. Returns whether a
    /// new subscription was made; an already-live lifecycle is a no-op.
    /// On failure the lifecycle stays `Unsubscribed` so a retry is possible.
    pub fn ensure_generic(
        &mut self,
        bus: &dyn EventBus,
        tx: &mpsc::Sender<StreamSignal>,
    ) -> Result<bool, SubscriptionError> {
        match self {
            ListenerLifecycle::Unsubscribed => {
                let set = ListenerSet::subscribe(bus, None, tx.clone())?;
                *self = ListenerLifecycle::GenericActive(set);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Subscribe directly to the scoped set when the identity is already
    /// known at dispatch time (the resume path). No-op if anything is live.
    pub fn ensure_scoped(
        &mut self,
        bus: &dyn EventBus,
        tx: &mpsc::Sender<StreamSignal>,
        external_id: &str,
    ) -> Result<bool, SubscriptionError> {
        match self {
            ListenerLifecycle::Unsubscribed => {
                let set = ListenerSet::subscribe(bus, Some(external_id), tx.clone())?;
                *self = ListenerLifecycle::ScopedActive {
                    external_id: external_id.to_string(),
                    set,
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Hand off from generic to scoped listening once the identity is
    /// observed. Scoped is subscribed before generic is dropped. Calling
    /// this again for the same identity is a no-op; the transition is
    /// one-time and monotonic per handle.
    ///
    /// On failure the previous state is restored (generic stays live), so
    /// the stream keeps flowing and a later retry is possible.
    pub fn promote(
        &mut self,
        bus: &dyn EventBus,
        tx: &mpsc::Sender<StreamSignal>,
        external_id: &str,
    ) -> Result<bool, SubscriptionError> {
        match std::mem::replace(self, ListenerLifecycle::Unsubscribed) {
            ListenerLifecycle::GenericActive(generic) => {
                match ListenerSet::subscribe(bus, Some(external_id), tx.clone()) {
                    Ok(scoped) => {
                        generic.unsubscribe();
                        *self = ListenerLifecycle::ScopedActive {
                            external_id: external_id.to_string(),
                            set: scoped,
                        };
                        debug!(external_id, "listener handoff: generic -> scoped");
                        Ok(true)
                    }
                    Err(err) => {
                        *self = ListenerLifecycle::GenericActive(generic);
                        Err(err)
                    }
                }
            }
            ListenerLifecycle::Unsubscribed => {
                let set = ListenerSet::subscribe(bus, Some(external_id), tx.clone())?;
                *self = ListenerLifecycle::ScopedActive {
                    external_id: external_id.to_string(),
                    set,
                };
                Ok(true)
            }
            scoped @ ListenerLifecycle::ScopedActive { .. } => {
                if let ListenerLifecycle::ScopedActive { external_id: id, .. } = &scoped {
                    if id != external_id {
                        warn!(
                            current = %id,
                            observed = %external_id,
                            "ignoring identity change on a scoped handle; a new identity means a new handle"
                        );
                    }
                }
                *self = scoped;
                Ok(false)
            }
        }
    }

    /// Unsubscribe whatever is live. Idempotent.
    pub fn teardown(&mut self) {
        match std::mem::replace(self, ListenerLifecycle::Unsubscribed) {
            ListenerLifecycle::Unsubscribed => {}
            ListenerLifecycle::GenericActive(set) => set.unsubscribe(),
            ListenerLifecycle::ScopedActive { set, .. } => set.unsubscribe(),
        }
    }
}
