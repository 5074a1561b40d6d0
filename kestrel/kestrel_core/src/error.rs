//! Error types for the Kestrel actor runtime.
//!
//! Each subsystem has its own error type. The root `Error` wraps all of
//! them so callers that do not care about the subsystem can use a single
//! `Result` alias.
//!
//! Propagation rules:
//!
//! - `MailboxError` is local to the sender; it never crashes a worker.
//! - `BehaviorError` is caught at the actor cell boundary and turned into a
//!   supervision decision.
//! - `SupervisionError` is the cause a parent fails with when a child
//!   escalates. With no parent left it is recorded as a root failure.

use crate::id::ActorId;
use std::time::Duration;
use thiserror::Error;

/// Root error type for the Kestrel runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Mailbox errors
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    /// Errors raised while computing an actor's next state
    #[error("Behavior error: {0}")]
    Behavior(#[from] BehaviorError),

    /// Supervision errors
    #[error("Supervision error: {0}")]
    Supervision(#[from] SupervisionError),

    /// Actor system errors
    #[error("System error: {0}")]
    System(#[from] SystemError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging could not be initialised
    #[error("Logging error: {0}")]
    Logging(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned when enqueueing into a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailboxError {
    /// The bounded mailbox is at capacity and its policy rejects new messages
    #[error("mailbox of actor {actor} is full (capacity {capacity})")]
    Full {
        /// Owner of the mailbox
        actor: ActorId,
        /// Configured capacity
        capacity: usize,
    },

    /// The mailbox has been closed because the actor stopped
    #[error("mailbox of actor {0} is closed")]
    Closed(ActorId),

    /// A blocking enqueue gave up waiting for free capacity
    #[error("timed out waiting for capacity in mailbox of actor {0}")]
    Timeout(ActorId),
}

/// Errors raised by a behavior while processing a message.
#[derive(Debug, Error)]
pub enum BehaviorError {
    /// The behavior reported a failure
    #[error("behavior failed: {0}")]
    Failed(String),

    /// The behavior panicked
    #[error("behavior panicked: {0}")]
    Panicked(String),

    /// A child escalated a failure to this actor
    #[error(transparent)]
    Supervision(#[from] SupervisionError),
}

impl BehaviorError {
    /// Create a `Failed` error from anything printable.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }
}

/// Errors produced by the supervision machinery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisionError {
    /// The restart budget of an actor was used up
    #[error("actor {actor} exhausted its restart budget ({retries} retries): {cause}")]
    Exhausted {
        /// Actor whose budget ran out
        actor: ActorId,
        /// Configured maximum number of restarts
        retries: u32,
        /// Failure that triggered the last decision
        cause: String,
    },

    /// A child escalated its failure
    #[error("child {child} escalated: {cause}")]
    Escalated {
        /// The escalating child
        child: ActorId,
        /// Failure reported by the child
        cause: String,
    },
}

/// Errors reported by the actor system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SystemError {
    /// The system no longer accepts work
    #[error("actor system is shutting down")]
    ShuttingDown,

    /// Another live actor already uses the path
    #[error("actor name already taken: {0}")]
    NameTaken(String),

    /// No live actor has the given id
    #[error("actor not found: {0}")]
    ActorNotFound(ActorId),

    /// An actor tried to stop an actor that is not its child
    #[error("actor {child} is not a child of {parent}")]
    NotAChild {
        /// The requesting actor
        parent: ActorId,
        /// The actor it tried to stop
        child: ActorId,
    },

    /// A runtime thread could not be started
    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),

    /// Waiting for the system timed out
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A runtime component was asked for something it cannot provide
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors related to runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    /// The configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// The configuration is semantically invalid
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type used across the Kestrel crates.
pub type Result<T> = std::result::Result<T, Error>;
