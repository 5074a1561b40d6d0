//! System event stream.
//!
//! Lifecycle changes, failures and dead letters are published to every
//! subscriber over an unbounded crossbeam channel. Subscribers that dropped
//! their receiver are pruned on the next publish.

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use kestrel_core::{ActorId, SupervisionError};
use parking_lot::Mutex;

use super::dead_letter::DeadLetter;
use super::system::ActorStatus;

/// A failure that escalated past every supervisor
#[derive(Debug, Clone, PartialEq)]
pub struct RootFailure {
    /// Top-level actor that escalated
    pub actor: ActorId,
    /// Its path
    pub path: String,
    /// The escalated failure
    pub error: SupervisionError,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
}

/// Something that happened inside the actor system
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    /// An actor finished `init` and is running
    Started {
        /// The actor
        actor: ActorId,
        /// Its path
        path: String,
    },
    /// An actor's behavior returned an error or panicked
    Failed {
        /// The actor
        actor: ActorId,
        /// Rendered failure
        error: String,
    },
    /// An actor is being restarted
    Restarted {
        /// The actor
        actor: ActorId,
        /// 1-based restart number within the current window
        attempt: u32,
    },
    /// An actor escalated a failure to its parent
    Escalated {
        /// The escalating actor
        actor: ActorId,
        /// Its parent, `None` at the top of the tree
        parent: Option<ActorId>,
        /// The escalated failure
        error: SupervisionError,
    },
    /// An actor terminated
    Terminated {
        /// The actor
        actor: ActorId,
        /// Its path
        path: String,
        /// Final status (`Stopped` or `Escalated`)
        status: ActorStatus,
    },
    /// A message could not be delivered
    DeadLetter(DeadLetter),
    /// An escalation reached the top of the tree
    RootFailure(RootFailure),
}

/// Fan-out of system events to subscribers
#[derive(Debug, Default)]
pub struct EventStream {
    subscribers: Mutex<Vec<Sender<SystemEvent>>>,
}

impl EventStream {
    /// Create a stream with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> Receiver<SystemEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Send `event` to all live subscribers
    pub fn publish(&self, event: SystemEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
