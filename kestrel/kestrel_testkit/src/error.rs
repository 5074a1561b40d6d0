use kestrel_core::SystemError;
use std::time::Duration;
use thiserror::Error;

/// Failed expectation or harness error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TestKitError {
    /// Nothing matching arrived in time
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// How long the expectation waited
        waited: Duration,
        /// What was expected
        what: String,
    },

    /// The next message did not satisfy the expectation
    #[error("unexpected message: {0}")]
    Unexpected(String),

    /// A message arrived when none was expected
    #[error("expected no message, received {0}")]
    NoMessageExpected(String),

    /// The probe's actor is gone
    #[error("probe {0} has terminated")]
    ProbeTerminated(String),

    /// Error from the actor system
    #[error(transparent)]
    System(#[from] SystemError),
}
