//! Logging utilities.
//!
//! Runtime crates log through the `log` facade. This module defines the
//! configurable log level and installs a `tracing-subscriber` formatter that
//! also receives `log` records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

use crate::error::Error;

/// Log level, ordered by increasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose debug information.
    Trace,

    /// Debug information.
    Debug,

    /// Informational messages.
    Info,

    /// Warning messages.
    Warning,

    /// Error messages.
    Error,
}

impl LogLevel {
    /// Get the name of this log level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }

    /// Check if this log level is at least as severe as the given level.
    pub fn is_at_least(&self, level: LogLevel) -> bool {
        *self >= level
    }
}

impl FromStr for LogLevel {
    type Err = ();

    /// Case-insensitive; accepts `warn` and `err` as aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" | "err" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Configuration for the logging subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The base log level
    #[serde(default = "default_level")]
    pub level: LogLevel,

    /// Whether to print worker thread names (useful to see dispatching)
    #[serde(default = "default_true")]
    pub thread_names: bool,

    /// Whether to print the emitting module path
    #[serde(default = "default_true")]
    pub targets: bool,
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            thread_names: true,
            targets: true,
        }
    }
}

/// Install the global log subscriber.
///
/// Fails if a subscriber (or a `log` logger) is already installed, which
/// callers running several systems in one process can safely ignore.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.level))
        .with_thread_names(config.thread_names)
        .with_target(config.targets)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    log::debug!("Logging initialised at level {}", config.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!(LogLevel::from_str("WARN"), Ok(LogLevel::Warning));
        assert_eq!(LogLevel::from_str("err"), Ok(LogLevel::Error));
        assert_eq!(LogLevel::from_str("Trace"), Ok(LogLevel::Trace));
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error.is_at_least(LogLevel::Warning));
        assert!(!LogLevel::Debug.is_at_least(LogLevel::Info));
        assert_eq!(LevelFilter::from(LogLevel::Warning), LevelFilter::WARN);
    }

    #[test]
    fn test_logging_config_serde() {
        let config: LoggingConfig = serde_json::from_str(r#"{ "level": "debug" }"#).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.thread_names);
        assert!(config.targets);
    }

    #[test]
    fn test_init_twice_reports_error() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
