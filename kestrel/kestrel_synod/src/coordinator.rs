//! Sets up a run and waits for the gatherer.

use crossbeam_channel::Sender;
use kestrel_concurrency::scheduler::TimerHandle;
use kestrel_concurrency::{
    ActorRef, Behavior, Context, SpawnOptions, SupervisionStrategy, Transition,
};
use kestrel_core::BehaviorError;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;

use crate::gatherer::{GatherOutcome, Gatherer};
use crate::params::SynodParams;
use crate::process::{Process, ProcessMessage};
use crate::run::RunReport;

/// Messages handled by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorMessage {
    /// The leader election timeout elapsed
    Hold,
    /// The gatherer collected enough decisions
    Gathered(GatherOutcome),
    /// The gatherer has terminated
    GathererTerminated,
}

/// Spawns the gatherer and the processes, elects a leader after the
/// timeout, and reports once the gatherer terminates
pub struct Coordinator {
    params: SynodParams,
    seed: u64,
    report: Sender<RunReport>,
}

impl Coordinator {
    /// Coordinator of one run; the report is sent to `report`
    pub fn new(params: SynodParams, seed: u64, report: Sender<RunReport>) -> Self {
        Self {
            params,
            seed,
            report,
        }
    }
}

/// Seed of process `pid` in a run seeded with `seed`
pub fn process_seed(seed: u64, pid: usize) -> u64 {
    seed.wrapping_add(pid as u64)
}

/// State of a running coordinator
pub struct CoordinatorState {
    processes: Vec<ActorRef<ProcessMessage>>,
    leader: usize,
    faulty: Vec<usize>,
    hold: Vec<usize>,
    held: bool,
    outcome: Option<GatherOutcome>,
    hold_timer: Option<TimerHandle>,
    started: Instant,
}

impl Behavior for Coordinator {
    type Message = CoordinatorMessage;
    type State = CoordinatorState;

    fn init(
        &self,
        ctx: &mut Context<'_, CoordinatorMessage>,
    ) -> Result<CoordinatorState, BehaviorError> {
        let n = self.params.n;
        let f = self.params.f;
        if n == 0 || f >= n {
            return Err(BehaviorError::failed(format!("cannot run {} of {} faulty", f, n)));
        }
        let mut rng = StdRng::seed_from_u64(self.seed);

        let myself = ctx.myself();
        let gatherer = ctx
            .spawn(
                Gatherer::new(self.params.expected_deliveries(), myself),
                SpawnOptions::named("gatherer").with_strategy(SupervisionStrategy::Stop),
            )
            .map_err(BehaviorError::failed)?;
        ctx.watch(&gatherer, CoordinatorMessage::GathererTerminated);

        let mut processes = Vec::with_capacity(n);
        for pid in 1..=n {
            let process = ctx
                .spawn(
                    Process::new(pid, n, process_seed(self.seed, pid)),
                    SpawnOptions::named(pid.to_string()).with_strategy(SupervisionStrategy::Stop),
                )
                .map_err(BehaviorError::failed)?;
            processes.push(process);
        }

        let mut shuffled: Vec<usize> = (1..=n).collect();
        shuffled.shuffle(&mut rng);
        let leader = shuffled[0];
        let faulty = shuffled[n - f..].to_vec();
        let hold = shuffled[1..].to_vec();
        info!(
            "Starting run with n = {}, f = {}, leader {}, faulty {:?}",
            n, f, leader, faulty
        );

        let peers: Arc<[ActorRef<ProcessMessage>]> = processes.clone().into();
        for process in &processes {
            let init = ProcessMessage::Init {
                peers: Arc::clone(&peers),
                gatherer: gatherer.clone(),
            };
            ctx.tell(process, init);
        }
        for process in &processes {
            ctx.tell(process, ProcessMessage::Launch);
        }
        for pid in &faulty {
            let crash = ProcessMessage::Crash {
                probability: self.params.crash_probability,
            };
            ctx.tell(&processes[pid - 1], crash);
        }

        let hold_timer = ctx
            .schedule_once(self.params.leader_timeout(), CoordinatorMessage::Hold)
            .map_err(BehaviorError::failed)?;

        Ok(CoordinatorState {
            processes,
            leader,
            faulty,
            hold,
            held: false,
            outcome: None,
            hold_timer: Some(hold_timer),
            started: Instant::now(),
        })
    }

    fn receive(
        &self,
        mut state: CoordinatorState,
        message: CoordinatorMessage,
        ctx: &mut Context<'_, CoordinatorMessage>,
    ) -> Result<Transition<CoordinatorState>, BehaviorError> {
        match message {
            CoordinatorMessage::Hold => {
                debug!("Leader timeout elapsed; process {} keeps proposing", state.leader);
                for pid in &state.hold {
                    ctx.tell(&state.processes[pid - 1], ProcessMessage::Hold);
                }
                state.held = true;
                state.hold_timer = None;
                Ok(Transition::next(state))
            }
            CoordinatorMessage::Gathered(outcome) => {
                state.outcome = Some(outcome);
                Ok(Transition::next(state))
            }
            CoordinatorMessage::GathererTerminated => {
                let report = RunReport {
                    params: self.params.clone(),
                    seed: self.seed,
                    leader: state.leader,
                    faulty: state.faulty.clone(),
                    held: state.held,
                    outcome: state.outcome.clone(),
                    elapsed: state.started.elapsed(),
                };
                info!(
                    "Run finished in {:?}: decided {:?}",
                    report.elapsed,
                    report.decided()
                );
                if self.report.send(report).is_err() {
                    debug!("Nobody is waiting for the report");
                }
                Ok(Transition::stop(state))
            }
        }
    }

    fn on_stop(&self, state: Option<CoordinatorState>) {
        if let Some(timer) = state.and_then(|state| state.hold_timer) {
            timer.cancel();
        }
    }
}
