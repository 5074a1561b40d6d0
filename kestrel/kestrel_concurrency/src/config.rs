//! Runtime configuration.
//!
//! Handles loading and validating the settings of an actor system. Files
//! may be TOML or JSON, chosen by extension; every field has a default.

use kestrel_core::{ConfigError, LoggingConfig};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::actor::mailbox::MailboxConfig;
use crate::actor::supervisor::SupervisionStrategy;
use crate::scheduler::DispatcherConfig;

/// Settings for one actor system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker pool settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Mailbox used when a spawn does not specify one
    #[serde(default)]
    pub mailbox: MailboxConfig,

    /// Supervision strategy used when a spawn does not specify one
    #[serde(default)]
    pub supervision: SupervisionStrategy,

    /// Number of dead letters kept for inspection
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,

    /// Number of terminated actors whose final status stays queryable
    #[serde(default = "default_terminated_history")]
    pub terminated_history: usize,

    /// How long `await_termination` waits by default (milliseconds)
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_dead_letter_capacity() -> usize {
    1000
}

fn default_terminated_history() -> usize {
    1024
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            mailbox: MailboxConfig::default(),
            supervision: SupervisionStrategy::default(),
            dead_letter_capacity: default_dead_letter_capacity(),
            terminated_history: default_terminated_history(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a file, or use defaults when `path` is `None`
    /// or does not exist
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path,
            None => {
                info!("No configuration file specified, using defaults");
                return Ok(Self::default());
            }
        };

        info!("Loading configuration from {}", path.display());
        if !path.exists() {
            warn!("Configuration file not found: {}", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("{}: {}", path.display(), e)))?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Parse JSON text
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "Worker threads cannot be zero".to_string(),
            ));
        }

        if self.dispatcher.throughput == 0 {
            return Err(ConfigError::Invalid("Throughput cannot be zero".to_string()));
        }

        if self.mailbox.capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "Mailbox capacity cannot be zero".to_string(),
            ));
        }

        if self.dead_letter_capacity == 0 {
            return Err(ConfigError::Invalid(
                "Dead letter capacity cannot be zero".to_string(),
            ));
        }

        if self.terminated_history == 0 {
            return Err(ConfigError::Invalid(
                "Terminated history cannot be zero".to_string(),
            ));
        }

        self.supervision.validate().map_err(ConfigError::Invalid)?;

        if self.shutdown_timeout_ms == 0 {
            warn!("Shutdown timeout is zero; await_termination will not wait");
        }

        Ok(())
    }

    /// Default wait for `await_termination`
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
