#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Kestrel Concurrency
//!
//! A typed actor runtime: each actor owns private state, receives messages
//! through a mailbox, processes them one at a time, and is supervised by its
//! parent.
//!
//! This crate provides:
//!
//! - Mailboxes with unbounded, reject, drop-oldest and blocking policies
//! - Behaviors as owned-state transition functions
//! - A worker-pool dispatcher and a manually stepped deterministic one
//! - Supervision trees with restart budgets, backoff and escalation
//! - Dead letters, a system event stream and runtime configuration
//!
//! ## Example
//!
//! ```no_run
//! use kestrel_concurrency::actor::{from_fn, Transition};
//! use kestrel_concurrency::ActorSystem;
//!
//! #[derive(Debug)]
//! enum Counter {
//!     Increment,
//! }
//!
//! let system = ActorSystem::new("example").unwrap();
//! let counter = system
//!     .spawn(from_fn(0u64, |count, msg: Counter, _ctx| match msg {
//!         Counter::Increment => Ok(Transition::next(count + 1)),
//!     }))
//!     .unwrap();
//! counter.tell(Counter::Increment).unwrap();
//! ```

/// Actors, mailboxes, supervision and the actor system
pub mod actor;

/// Runtime configuration
pub mod config;

/// Turn scheduling onto threads
pub mod scheduler;

/// Atomic statistics helpers
pub mod sync;

pub use actor::{
    ActorRef, ActorStatus, ActorSystem, Behavior, Context, SpawnOptions, SupervisionStrategy,
    Transition,
};
pub use config::RuntimeConfig;
pub use scheduler::{Dispatcher, ManualDispatcher, ThreadPoolDispatcher};
