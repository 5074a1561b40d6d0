//! Experiment parameters and the parameter grid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SynodError;

/// Process counts of the standard sweep
pub const GRID_PROCESSES: [usize; 5] = [3, 25, 50, 75, 100];

/// Crash probabilities of the standard sweep
pub const GRID_CRASH_PROBABILITIES: [f64; 4] = [0.0, 0.01, 0.1, 1.0];

/// Leader election timeouts of the standard sweep, in milliseconds
pub const GRID_LEADER_TIMEOUTS_MS: [u64; 4] = [500, 1000, 1500, 2000];

/// Parameters of one consensus run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynodParams {
    /// Number of processes
    pub n: usize,

    /// Number of fault-prone processes
    pub f: usize,

    /// Probability that a fault-prone process crashes after a message
    pub crash_probability: f64,

    /// Delay before every process except the leader is put on hold
    pub leader_timeout_ms: u64,

    /// Seed for every random choice of the run; drawn at random when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SynodParams {
    /// Parameters with the largest tolerated number of faulty processes
    pub fn new(n: usize, crash_probability: f64, leader_timeout_ms: u64) -> Self {
        Self {
            n,
            f: Self::max_faulty(n),
            crash_probability,
            leader_timeout_ms,
            seed: None,
        }
    }

    /// Fix the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Largest `f` that still leaves a majority of correct processes
    pub fn max_faulty(n: usize) -> usize {
        (n / 2 + n % 2).saturating_sub(1)
    }

    /// Size of a majority
    pub fn quorum(&self) -> usize {
        self.n / 2 + 1
    }

    /// Number of decisions the gatherer waits for
    pub fn expected_deliveries(&self) -> usize {
        self.n - self.f
    }

    /// Leader election timeout
    pub fn leader_timeout(&self) -> Duration {
        Duration::from_millis(self.leader_timeout_ms)
    }

    /// Check that the run can terminate
    pub fn validate(&self) -> Result<(), SynodError> {
        if self.n == 0 {
            return Err(SynodError::InvalidParams("n must be at least 1".to_string()));
        }
        if self.f > Self::max_faulty(self.n) {
            return Err(SynodError::InvalidParams(format!(
                "f = {} leaves no correct majority among {} processes",
                self.f, self.n
            )));
        }
        if !(0.0..=1.0).contains(&self.crash_probability) {
            return Err(SynodError::InvalidParams(format!(
                "crash probability {} is outside [0, 1]",
                self.crash_probability
            )));
        }
        Ok(())
    }

    /// The standard sweep, repeating every combination `iterations` times
    pub fn grid(iterations: usize) -> Vec<Trial> {
        let mut trials = Vec::with_capacity(
            GRID_PROCESSES.len()
                * GRID_CRASH_PROBABILITIES.len()
                * GRID_LEADER_TIMEOUTS_MS.len()
                * iterations,
        );
        for n in GRID_PROCESSES {
            for a in GRID_CRASH_PROBABILITIES {
                for t in GRID_LEADER_TIMEOUTS_MS {
                    for iteration in 0..iterations {
                        trials.push(Trial {
                            params: SynodParams::new(n, a, t),
                            iteration,
                        });
                    }
                }
            }
        }
        trials
    }
}

/// One entry of a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Run parameters
    pub params: SynodParams,
    /// Repetition index
    pub iteration: usize,
}

impl Trial {
    /// `n-f-percent-t-iteration`, e.g. `25-12-10-500-0`
    pub fn label(&self) -> String {
        format!(
            "{}-{}-{:.0}-{}-{}",
            self.params.n,
            self.params.f,
            self.params.crash_probability * 100.0,
            self.params.leader_timeout_ms,
            self.iteration
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_faulty() {
        assert_eq!(SynodParams::max_faulty(3), 1);
        assert_eq!(SynodParams::max_faulty(25), 12);
        assert_eq!(SynodParams::max_faulty(50), 24);
        assert_eq!(SynodParams::max_faulty(100), 49);
        assert_eq!(SynodParams::max_faulty(1), 0);
        assert_eq!(SynodParams::max_faulty(0), 0);
    }

    #[test]
    fn test_quorum_and_deliveries() {
        let params = SynodParams::new(25, 0.1, 500);
        assert_eq!(params.quorum(), 13);
        assert_eq!(params.expected_deliveries(), 13);
        assert_eq!(params.leader_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_validate() {
        assert!(SynodParams::new(3, 0.0, 500).validate().is_ok());
        assert!(SynodParams::new(0, 0.0, 500).validate().is_err());
        assert!(SynodParams::new(3, 1.5, 500).validate().is_err());
        assert!(SynodParams::new(3, f64::NAN, 500).validate().is_err());

        let mut params = SynodParams::new(4, 0.0, 500);
        params.f = 2;
        assert!(matches!(params.validate(), Err(SynodError::InvalidParams(_))));
    }

    #[test]
    fn test_grid() {
        let trials = SynodParams::grid(5);
        assert_eq!(trials.len(), 5 * 4 * 4 * 5);
        assert_eq!(trials[0].label(), "3-1-0-500-0");
        assert_eq!(trials[4].label(), "3-1-0-500-4");
        assert_eq!(trials[5].label(), "3-1-0-1000-0");
        assert_eq!(trials.last().unwrap().label(), "100-49-100-2000-4");
        assert!(SynodParams::grid(0).is_empty());
    }

    #[test]
    fn test_serde() {
        let params: SynodParams = serde_json::from_str(
            r#"{ "n": 3, "f": 1, "crash_probability": 0.1, "leader_timeout_ms": 500 }"#,
        )
        .unwrap();
        assert_eq!(params, SynodParams::new(3, 0.1, 500));
    }
}
