//! Actor supervision and failure recovery.
//!
//! Every actor is spawned with a `SupervisionStrategy` chosen by its parent.
//! When the actor fails, the strategy turns the failure into a `Decision`
//! which the actor cell carries out: restart in place (optionally after a
//! backoff), stop, or escalate to the parent.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Delay schedule between consecutive restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the first restart (0 = restart immediately)
    #[serde(default)]
    pub initial_ms: u64,

    /// Upper bound for any single delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_ms: u64,

    /// Growth factor applied per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Backoff {
    /// Restart immediately every time
    pub fn none() -> Self {
        Self {
            initial_ms: 0,
            max_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }

    /// Doubling delays starting at `initial_ms`, capped at `max_ms`
    pub fn exponential(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_ms,
            max_ms,
            multiplier: default_multiplier(),
        }
    }

    /// Delay before restart number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.initial_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = (self.initial_ms as f64) * self.multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_ms as f64) as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::none()
    }
}

/// Strategy for handling actor failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SupervisionStrategy {
    /// Restart the failed actor with fresh state
    Restart {
        /// Restarts allowed before the failure is escalated
        max_retries: u32,

        /// Delay schedule between restarts
        #[serde(default)]
        backoff: Backoff,

        /// Only failures within this many milliseconds count toward the limit
        #[serde(default)]
        within_ms: Option<u64>,
    },

    /// Stop the failed actor
    Stop,

    /// Escalate the failure to the parent
    Escalate,
}

impl Default for SupervisionStrategy {
    fn default() -> Self {
        Self::Restart {
            max_retries: 10,
            backoff: Backoff::none(),
            within_ms: Some(60_000),
        }
    }
}

/// What the cell does about one failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Restart after `delay`; `attempt` counts failures in the current window
    Restart {
        /// 1-based restart number
        attempt: u32,
        /// Backoff before the new state is created
        delay: Duration,
    },
    /// Stop the actor
    Stop,
    /// Escalate the original failure
    Escalate,
    /// The restart budget is used up; escalate with `SupervisionError::Exhausted`
    Exhausted {
        /// Configured budget
        retries: u32,
    },
}

impl SupervisionStrategy {
    /// Restart with an immediate retry budget and no window
    pub fn restart(max_retries: u32) -> Self {
        Self::Restart {
            max_retries,
            backoff: Backoff::none(),
            within_ms: None,
        }
    }

    /// Restart with exponential backoff and no window
    pub fn restart_with_backoff(max_retries: u32, backoff: Backoff) -> Self {
        Self::Restart {
            max_retries,
            backoff,
            within_ms: None,
        }
    }

    /// Decide what to do about a failure, recording it in `stats`
    pub fn decide(&self, stats: &mut RestartStatistics) -> Decision {
        match self {
            Self::Restart {
                max_retries,
                backoff,
                within_ms,
            } => {
                let window = within_ms.map(Duration::from_millis);
                let failures = stats.record_failure(Instant::now(), window);
                if failures > *max_retries {
                    Decision::Exhausted {
                        retries: *max_retries,
                    }
                } else {
                    Decision::Restart {
                        attempt: failures,
                        delay: backoff.delay(failures),
                    }
                }
            }
            Self::Stop => Decision::Stop,
            Self::Escalate => Decision::Escalate,
        }
    }

    /// Decide about a restart the behavior asked for itself.
    ///
    /// Restart strategies keep their budget; other strategies restart
    /// immediately.
    pub fn decide_requested(&self, stats: &mut RestartStatistics) -> Decision {
        match self {
            Self::Restart { .. } => self.decide(stats),
            Self::Stop | Self::Escalate => Decision::Restart {
                attempt: stats.record_requested(),
                delay: Duration::ZERO,
            },
        }
    }

    /// Check the strategy parameters
    pub fn validate(&self) -> Result<(), String> {
        if let Self::Restart { backoff, .. } = self {
            if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
                return Err(format!(
                    "backoff multiplier must be finite and >= 1.0, got {}",
                    backoff.multiplier
                ));
            }
            if backoff.max_ms < backoff.initial_ms {
                return Err("backoff max_ms is smaller than initial_ms".to_string());
            }
        }
        Ok(())
    }
}

/// Failure timestamps of one actor, used to enforce restart limits
#[derive(Debug, Default)]
pub struct RestartStatistics {
    failures: VecDeque<Instant>,
    requested: u32,
}

impl RestartStatistics {
    /// Creates an empty statistics container
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure at `now`, returning the failures within `window`
    /// (all recorded failures when `window` is `None`)
    pub fn record_failure(&mut self, now: Instant, window: Option<Duration>) -> u32 {
        if let Some(window) = window {
            while let Some(&oldest) = self.failures.front() {
                if now.saturating_duration_since(oldest) > window {
                    self.failures.pop_front();
                } else {
                    break;
                }
            }
        }
        self.failures.push_back(now);
        self.failures.len() as u32
    }

    /// Count a restart the behavior asked for; no timestamp is kept
    pub fn record_requested(&mut self) -> u32 {
        self.requested = self.requested.saturating_add(1);
        self.requested
    }

    /// Number of failures currently tracked
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Forget all failures
    pub fn reset(&mut self) {
        self.failures.clear();
        self.requested = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy() {
        assert_eq!(
            SupervisionStrategy::default(),
            SupervisionStrategy::Restart {
                max_retries: 10,
                backoff: Backoff::none(),
                within_ms: Some(60_000),
            }
        );
    }

    #[test]
    fn test_restart_budget_is_exhausted_after_max_retries() {
        let strategy = SupervisionStrategy::restart(2);
        let mut stats = RestartStatistics::new();

        assert_eq!(
            strategy.decide(&mut stats),
            Decision::Restart {
                attempt: 1,
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            strategy.decide(&mut stats),
            Decision::Restart {
                attempt: 2,
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            strategy.decide(&mut stats),
            Decision::Exhausted { retries: 2 }
        );
    }

    #[test]
    fn test_zero_retries_exhausts_immediately() {
        let strategy = SupervisionStrategy::restart(0);
        let mut stats = RestartStatistics::new();
        assert_eq!(
            strategy.decide(&mut stats),
            Decision::Exhausted { retries: 0 }
        );
    }

    #[test]
    fn test_stop_and_escalate() {
        let mut stats = RestartStatistics::new();
        assert_eq!(SupervisionStrategy::Stop.decide(&mut stats), Decision::Stop);
        assert_eq!(
            SupervisionStrategy::Escalate.decide(&mut stats),
            Decision::Escalate
        );
        assert_eq!(stats.failure_count(), 0);
    }

    #[test]
    fn test_requested_restart_under_stop_strategy() {
        let mut stats = RestartStatistics::new();
        assert_eq!(
            SupervisionStrategy::Stop.decide_requested(&mut stats),
            Decision::Restart {
                attempt: 1,
                delay: Duration::ZERO
            }
        );
    }

    #[test]
    fn test_requested_restarts_keep_no_failure_history() {
        let mut stats = RestartStatistics::new();
        for expected in 1..=1_000u32 {
            assert_eq!(
                SupervisionStrategy::Escalate.decide_requested(&mut stats),
                Decision::Restart {
                    attempt: expected,
                    delay: Duration::ZERO
                }
            );
        }
        assert_eq!(stats.failure_count(), 0);
    }

    #[test]
    fn test_window_prunes_old_failures() {
        let mut stats = RestartStatistics::new();
        let start = Instant::now();
        let window = Some(Duration::from_millis(100));

        assert_eq!(stats.record_failure(start, window), 1);
        assert_eq!(
            stats.record_failure(start + Duration::from_millis(50), window),
            2
        );
        // The first failure is now outside the window
        assert_eq!(
            stats.record_failure(start + Duration::from_millis(120), window),
            2
        );
        assert_eq!(
            stats.record_failure(start + Duration::from_millis(400), window),
            1
        );

        stats.reset();
        assert_eq!(stats.failure_count(), 0);
    }

    #[test]
    fn test_backoff_delays() {
        let backoff = Backoff::exponential(10, 50);
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(20));
        assert_eq!(backoff.delay(3), Duration::from_millis(40));
        assert_eq!(backoff.delay(4), Duration::from_millis(50));
        assert_eq!(Backoff::none().delay(5), Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_bad_multiplier() {
        let strategy = SupervisionStrategy::restart_with_backoff(
            3,
            Backoff {
                initial_ms: 10,
                max_ms: 100,
                multiplier: f64::NAN,
            },
        );
        assert!(strategy.validate().is_err());
        assert!(SupervisionStrategy::default().validate().is_ok());
    }

    #[test]
    fn test_strategy_serde() {
        let strategy: SupervisionStrategy = serde_json::from_str(
            r#"{ "strategy": "restart", "max_retries": 3, "backoff": { "initial_ms": 5 } }"#,
        )
        .unwrap();
        assert_eq!(
            strategy,
            SupervisionStrategy::Restart {
                max_retries: 3,
                backoff: Backoff {
                    initial_ms: 5,
                    max_ms: 30_000,
                    multiplier: 2.0,
                },
                within_ms: None,
            }
        );

        let strategy: SupervisionStrategy =
            serde_json::from_str(r#"{ "strategy": "escalate" }"#).unwrap();
        assert_eq!(strategy, SupervisionStrategy::Escalate);
    }
}
