#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Kestrel Core
//!
//! `kestrel_core` provides the shared building blocks of the Kestrel actor
//! runtime: strongly typed identifiers, the error taxonomy used by every
//! other crate, and logging setup.
//!
//! ## Crate Structure
//!
//! - **error**: Error types for mailboxes, behaviors, supervision and the system
//! - **id**: Strongly-typed identifier types
//! - **logging**: Log levels and subscriber initialisation

pub mod error;
pub mod id;
pub mod logging;

pub use error::{
    BehaviorError, ConfigError, Error, MailboxError, Result, SupervisionError, SystemError,
};
pub use id::{ActorId, CorrelationId, Id};
pub use logging::{init_logging, LogLevel, LoggingConfig};
