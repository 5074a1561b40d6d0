//! Dead letters: messages that could not be delivered.
//!
//! The office keeps the most recent letters up to a capacity and counts all
//! of them. Each letter is also published on the event stream.

use chrono::{DateTime, Utc};
use kestrel_core::ActorId;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use super::event::{EventStream, SystemEvent};
use crate::sync::AtomicCounter;

/// Why a message became a dead letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The recipient had stopped (or never finished stopping its mailbox)
    Stopped,
    /// The recipient's bounded mailbox rejected the message
    MailboxFull,
    /// The message was evicted by a drop-oldest mailbox
    Dropped,
    /// A blocking send gave up waiting for capacity
    TimedOut,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Stopped => "recipient stopped",
            Self::MailboxFull => "mailbox full",
            Self::Dropped => "dropped from full mailbox",
            Self::TimedOut => "timed out waiting for capacity",
        };
        f.write_str(text)
    }
}

/// An undeliverable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Intended recipient
    pub recipient: ActorId,
    /// `Debug` rendering of the message
    pub message: String,
    /// Why it was not delivered
    pub reason: DeadLetterReason,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
}

impl DeadLetter {
    /// Record `message` as undeliverable to `recipient`
    pub fn new(recipient: ActorId, message: &dyn fmt::Debug, reason: DeadLetterReason) -> Self {
        Self {
            recipient,
            message: format!("{:?}", message),
            reason,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded store of recent dead letters
#[derive(Debug)]
pub struct DeadLetterOffice {
    capacity: usize,
    letters: Mutex<VecDeque<DeadLetter>>,
    total: AtomicCounter,
    events: Arc<EventStream>,
}

impl DeadLetterOffice {
    /// Keep at most `capacity` letters, publishing each on `events`
    pub fn new(capacity: usize, events: Arc<EventStream>) -> Self {
        Self {
            capacity,
            letters: Mutex::new(VecDeque::new()),
            total: AtomicCounter::default(),
            events,
        }
    }

    /// Record a dead letter
    pub fn publish(&self, letter: DeadLetter) {
        debug!(
            "Dead letter to {}: {} ({})",
            letter.recipient, letter.message, letter.reason
        );
        self.total.increment();
        {
            let mut letters = self.letters.lock();
            if self.capacity > 0 {
                if letters.len() >= self.capacity {
                    letters.pop_front();
                }
                letters.push_back(letter.clone());
            }
        }
        self.events.publish(SystemEvent::DeadLetter(letter));
    }

    /// The retained letters, oldest first
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.letters.lock().iter().cloned().collect()
    }

    /// Number of dead letters ever recorded
    pub fn total(&self) -> u64 {
        self.total.get()
    }
}
