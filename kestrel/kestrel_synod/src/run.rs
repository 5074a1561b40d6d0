//! Running a single experiment or a whole sweep.

use crossbeam_channel::RecvTimeoutError;
use kestrel_concurrency::{ActorSystem, RuntimeConfig, SpawnOptions, SupervisionStrategy};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::coordinator::Coordinator;
use crate::error::SynodError;
use crate::gatherer::{Delivery, GatherOutcome};
use crate::params::{SynodParams, Trial};
use crate::process::Value;

/// Result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Parameters of the run
    pub params: SynodParams,
    /// Seed actually used
    pub seed: u64,
    /// Process that kept proposing after the leader timeout
    pub leader: usize,
    /// Fault-prone processes
    pub faulty: Vec<usize>,
    /// Whether the leader timeout elapsed before the gatherer finished
    pub held: bool,
    /// What the gatherer saw, if it finished normally
    pub outcome: Option<GatherOutcome>,
    /// Time from setup to the gatherer terminating
    pub elapsed: Duration,
}

impl RunReport {
    /// The decided value
    pub fn decided(&self) -> Option<Value> {
        self.outcome.as_ref().and_then(GatherOutcome::value)
    }

    /// Whether enough processes decided and all decided the same value
    pub fn agreed(&self) -> bool {
        self.outcome.as_ref().is_some_and(|outcome| outcome.agreed)
    }

    /// Decisions in arrival order
    pub fn deliveries(&self) -> &[Delivery] {
        self.outcome
            .as_ref()
            .map(|outcome| outcome.deliveries.as_slice())
            .unwrap_or_default()
    }
}

/// Run one experiment on a fresh actor system.
///
/// Waits up to `timeout` for the report; the system is shut down either way.
pub fn run(
    params: &SynodParams,
    config: &RuntimeConfig,
    timeout: Duration,
) -> Result<RunReport, SynodError> {
    let label = format!("synod-{}-{}", params.n, params.f);
    run_labelled(&label, params, config, timeout)
}

/// Run one entry of a sweep
pub fn run_trial(
    trial: &Trial,
    config: &RuntimeConfig,
    timeout: Duration,
) -> Result<RunReport, SynodError> {
    run_labelled(&trial.label(), &trial.params, config, timeout)
}

fn run_labelled(
    label: &str,
    params: &SynodParams,
    config: &RuntimeConfig,
    timeout: Duration,
) -> Result<RunReport, SynodError> {
    params.validate()?;
    let seed = params.seed.unwrap_or_else(rand::random);
    info!("Run {} (seed {})", label, seed);

    let system = ActorSystem::with_config(label, config.clone())?;
    let (sender, receiver) = crossbeam_channel::bounded(1);
    let spawned = system.spawn_with(
        Coordinator::new(params.clone(), seed, sender),
        SpawnOptions::named("coordinator").with_strategy(SupervisionStrategy::Stop),
    );

    if let Err(e) = spawned {
        let _ = system.await_termination(config.shutdown_timeout());
        return Err(e.into());
    }

    let received = receiver.recv_timeout(timeout);
    if let Err(e) = system.await_termination(config.shutdown_timeout()) {
        warn!("Run {} did not shut down cleanly: {}", label, e);
    }

    match received {
        Ok(report) => Ok(report),
        Err(RecvTimeoutError::Timeout) => Err(SynodError::Timeout {
            label: label.to_string(),
            waited: timeout,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(SynodError::NoReport(label.to_string())),
    }
}

/// Outcome of one sweep entry
#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    /// The entry
    pub trial: Trial,
    /// Its report or why there is none
    pub result: Result<RunReport, SynodError>,
}

/// Run `trials` one after the other, each on its own actor system
pub fn sweep(trials: &[Trial], config: &RuntimeConfig, timeout: Duration) -> Vec<TrialResult> {
    trials
        .iter()
        .map(|trial| {
            let result = run_trial(trial, config, timeout);
            if let Err(e) = &result {
                warn!("Trial {} failed: {}", trial.label(), e);
            }
            TrialResult {
                trial: trial.clone(),
                result,
            }
        })
        .collect()
}
