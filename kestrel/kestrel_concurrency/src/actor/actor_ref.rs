//! Typed handles to actors.

use kestrel_core::{ActorId, MailboxError};
use log::warn;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use super::dead_letter::{DeadLetter, DeadLetterOffice, DeadLetterReason};
use super::mailbox::{Message, Rejected};

/// The receiving end of an `ActorRef`, implemented by actor cells
pub(crate) trait Deliver<M>: Send + Sync {
    /// Enqueue `message`, scheduling the actor if it was idle
    fn deliver(&self, message: M) -> Result<(), Rejected<M>>;

    /// Whether the mailbox still accepts messages
    fn is_open(&self) -> bool;
}

/// A handle for sending messages of type `M` to one actor.
///
/// References are cheap to clone and never keep the actor alive. Sending to
/// a stopped actor is not an error: the message becomes a dead letter.
pub struct ActorRef<M: Message> {
    id: ActorId,
    path: Arc<str>,
    target: Weak<dyn Deliver<M>>,
    dead_letters: Arc<DeadLetterOffice>,
}

impl<M: Message> ActorRef<M> {
    pub(crate) fn new(
        id: ActorId,
        path: Arc<str>,
        target: Weak<dyn Deliver<M>>,
        dead_letters: Arc<DeadLetterOffice>,
    ) -> Self {
        Self {
            id,
            path,
            target,
            dead_letters,
        }
    }

    /// Id of the target actor
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Path of the target actor, e.g. `/user/parent/child`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the actor still accepts messages
    pub fn is_alive(&self) -> bool {
        self.target
            .upgrade()
            .map(|target| target.is_open())
            .unwrap_or(false)
    }

    /// Enqueue a message (fire and forget).
    ///
    /// Returns `Err` only when a bounded mailbox refused the message
    /// (`Full`) or a blocking send timed out (`Timeout`); the message is
    /// dead-lettered in both cases.
    pub fn tell(&self, message: M) -> Result<(), MailboxError> {
        let target = match self.target.upgrade() {
            Some(target) => target,
            None => {
                self.dead_letter(&message, DeadLetterReason::Stopped);
                return Ok(());
            }
        };

        match target.deliver(message) {
            Ok(()) => Ok(()),
            Err(Rejected {
                error: MailboxError::Closed(_),
                message,
            }) => {
                self.dead_letter(&message, DeadLetterReason::Stopped);
                Ok(())
            }
            Err(Rejected { error, message }) => {
                warn!("Message to {} rejected: {}", self.path, error);
                let reason = match error {
                    MailboxError::Timeout(_) => DeadLetterReason::TimedOut,
                    _ => DeadLetterReason::MailboxFull,
                };
                self.dead_letter(&message, reason);
                Err(error)
            }
        }
    }

    fn dead_letter(&self, message: &M, reason: DeadLetterReason) {
        self.dead_letters
            .publish(DeadLetter::new(self.id, message, reason));
    }
}

impl<M: Message> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            path: Arc::clone(&self.path),
            target: Weak::clone(&self.target),
            dead_letters: Arc::clone(&self.dead_letters),
        }
    }
}

impl<M: Message> PartialEq for ActorRef<M> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<M: Message> Eq for ActorRef<M> {}

impl<M: Message> Hash for ActorRef<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<M: Message> fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorRef({} {})", self.path, self.id.short())
    }
}

impl<M: Message> fmt::Display for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
