//! Errors of a consensus run.

use kestrel_core::SystemError;
use std::time::Duration;
use thiserror::Error;

/// Errors of a consensus run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynodError {
    /// The parameters cannot describe a valid run
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// No decision reached the gatherer in time
    #[error("run {label} did not finish within {waited:?}")]
    Timeout {
        /// Label of the run
        label: String,
        /// How long the run was given
        waited: Duration,
    },

    /// The coordinator terminated without reporting
    #[error("run {0} ended without a report")]
    NoReport(String),

    /// Error from the actor system
    #[error(transparent)]
    System(#[from] SystemError),
}
