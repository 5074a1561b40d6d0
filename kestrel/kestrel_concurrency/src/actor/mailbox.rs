//! Actor mailbox implementation for message passing.
//!
//! A mailbox is the ordered inbound queue of exactly one actor. Besides the
//! user queue it carries a small priority queue of runtime system messages
//! and the idle/runnable flag the dispatcher relies on: a mailbox is handed
//! to the run-queue only when an enqueue finds it idle.

use kestrel_core::{ActorId, MailboxError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::cell::SystemMessage;

/// A message an actor can receive.
///
/// Implemented for every `Debug + Send + 'static` type; protocols are
/// usually closed enums matched exhaustively by the behavior.
pub trait Message: fmt::Debug + Send + 'static {}

impl<T: fmt::Debug + Send + 'static> Message for T {}

/// What a bounded mailbox does when it is full
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the new message with `MailboxError::Full`
    Reject,
    /// Evict the oldest queued message to make room
    DropOldest,
    /// Wait for free capacity, optionally giving up after a timeout.
    ///
    /// Sends issued by an actor run on its dispatcher worker, so without a
    /// timeout a full target parks that worker until the target drains.
    Block {
        /// Milliseconds to wait before failing with `MailboxError::Timeout`
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::Reject
    }
}

/// Configuration for a mailbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Maximum number of queued user messages; `None` means unbounded
    #[serde(default)]
    pub capacity: Option<usize>,

    /// Behavior when the capacity is reached
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl MailboxConfig {
    /// An unbounded mailbox.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A bounded mailbox with the given overflow policy.
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            overflow,
        }
    }
}

/// Successful enqueue.
#[derive(Debug)]
pub struct Enqueued<M> {
    /// The mailbox went from idle to runnable; the caller must schedule it
    pub schedule: bool,
    /// Message evicted under `OverflowPolicy::DropOldest`
    pub displaced: Option<M>,
}

/// A refused enqueue, handing the message back to the sender.
#[derive(Debug)]
pub struct Rejected<M> {
    /// Why the message was refused
    pub error: MailboxError,
    /// The refused message
    pub message: M,
}

struct Queues<M> {
    user: VecDeque<M>,
    system: VecDeque<SystemMessage>,
    closed: bool,
}

/// The inbound queue of one actor
pub struct Mailbox<M: Message> {
    owner: ActorId,
    config: MailboxConfig,
    queues: Mutex<Queues<M>>,
    // Signalled when capacity frees up or the mailbox closes
    space: Condvar,
    scheduled: AtomicBool,
}

impl<M: Message> Mailbox<M> {
    /// Create an idle, empty mailbox
    pub fn new(owner: ActorId, config: MailboxConfig) -> Self {
        Self {
            owner,
            config,
            queues: Mutex::new(Queues {
                user: VecDeque::new(),
                system: VecDeque::new(),
                closed: false,
            }),
            space: Condvar::new(),
            scheduled: AtomicBool::new(false),
        }
    }

    /// Append a message, applying the overflow policy when full
    pub fn enqueue(&self, message: M) -> Result<Enqueued<M>, Rejected<M>> {
        let mut queues = self.queues.lock();
        if queues.closed {
            return Err(self.reject(message, MailboxError::Closed(self.owner)));
        }

        let mut displaced = None;
        if let Some(capacity) = self.config.capacity {
            if queues.user.len() >= capacity {
                match &self.config.overflow {
                    OverflowPolicy::Reject => {
                        return Err(self.reject(
                            message,
                            MailboxError::Full {
                                actor: self.owner,
                                capacity,
                            },
                        ));
                    }
                    OverflowPolicy::DropOldest => {
                        displaced = queues.user.pop_front();
                    }
                    OverflowPolicy::Block { timeout_ms } => {
                        // A timeout past the end of `Instant` waits forever
                        let deadline = timeout_ms.and_then(|ms| {
                            Instant::now().checked_add(Duration::from_millis(ms))
                        });
                        while queues.user.len() >= capacity && !queues.closed {
                            match deadline {
                                Some(deadline) => {
                                    if self.space.wait_until(&mut queues, deadline).timed_out()
                                        && queues.user.len() >= capacity
                                        && !queues.closed
                                    {
                                        return Err(self
                                            .reject(message, MailboxError::Timeout(self.owner)));
                                    }
                                }
                                None => self.space.wait(&mut queues),
                            }
                        }
                        if queues.closed {
                            return Err(self.reject(message, MailboxError::Closed(self.owner)));
                        }
                    }
                }
            }
        }

        queues.user.push_back(message);
        drop(queues);

        Ok(Enqueued {
            schedule: self.try_schedule(),
            displaced,
        })
    }

    /// Remove and return the oldest user message, `None` when empty
    pub fn dequeue(&self) -> Option<M> {
        let message = self.queues.lock().user.pop_front();
        if message.is_some() && self.config.capacity.is_some() {
            self.space.notify_one();
        }
        message
    }

    /// Queue a system message; returns `true` if the caller must schedule
    pub(crate) fn enqueue_system(&self, message: SystemMessage) -> bool {
        {
            let mut queues = self.queues.lock();
            if queues.closed {
                return false;
            }
            queues.system.push_back(message);
        }
        self.try_schedule()
    }

    pub(crate) fn dequeue_system(&self) -> Option<SystemMessage> {
        self.queues.lock().system.pop_front()
    }

    /// Mark the mailbox runnable. Returns `true` if it was idle, in which
    /// case the caller owns the obligation to dispatch it.
    pub fn try_schedule(&self) -> bool {
        self.scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// End a turn. Marks the mailbox idle and, if work arrived meanwhile,
    /// re-marks it runnable and returns `true` (the caller re-dispatches).
    ///
    /// With `include_user == false` only system messages count as work;
    /// used while the actor is suspended.
    pub fn release(&self, include_user: bool) -> bool {
        self.scheduled.store(false, Ordering::SeqCst);
        let pending = {
            let queues = self.queues.lock();
            !queues.system.is_empty() || (include_user && !queues.user.is_empty())
        };
        pending && self.try_schedule()
    }

    /// Close the mailbox and return the messages still queued
    pub fn close(&self) -> Vec<M> {
        let remaining = {
            let mut queues = self.queues.lock();
            queues.closed = true;
            queues.system.clear();
            queues.user.drain(..).collect()
        };
        self.space.notify_all();
        remaining
    }

    /// Whether the mailbox has been closed
    pub fn is_closed(&self) -> bool {
        self.queues.lock().closed
    }

    /// Number of queued user messages
    pub fn len(&self) -> usize {
        self.queues.lock().user.len()
    }

    /// Whether no user message is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queued user and system messages
    pub fn pending(&self) -> usize {
        let queues = self.queues.lock();
        queues.user.len() + queues.system.len()
    }

    /// Configured capacity, `None` if unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.config.capacity
    }

    /// Owner of this mailbox
    pub fn owner(&self) -> ActorId {
        self.owner
    }

    fn reject(&self, message: M, error: MailboxError) -> Rejected<M> {
        Rejected { error, message }
    }
}

impl<M: Message> fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("owner", &self.owner)
            .field("config", &self.config)
            .field("len", &self.len())
            .finish()
    }
}
