//! Actor-based concurrency system with message passing and supervision.
//!
//! This module provides the core actor model implementation, including:
//!
//! - Typed mailboxes with bounded overflow policies
//! - Behaviors as state transition functions, with a buffering context
//! - Actor cells that run turns and apply supervision decisions
//! - The actor system: registry, tree, dead letters and event stream

pub mod actor_ref;
pub mod behavior;
pub(crate) mod cell;
pub mod context;
pub mod correlation;
pub mod dead_letter;
pub mod event;
pub mod mailbox;
pub mod supervisor;
pub mod system;

pub use actor_ref::ActorRef;
pub use behavior::{from_fn, Behavior, Directive, FnBehavior, Transition};
pub use cell::ActorStats;
pub use context::Context;
pub use correlation::PendingRequests;
pub use dead_letter::{DeadLetter, DeadLetterOffice, DeadLetterReason};
pub use event::{EventStream, RootFailure, SystemEvent};
pub use mailbox::{Enqueued, Mailbox, MailboxConfig, Message, OverflowPolicy, Rejected};
pub use supervisor::{Backoff, Decision, RestartStatistics, SupervisionStrategy};
pub use system::{ActorInfo, ActorStatus, ActorSystem, SpawnOptions};
