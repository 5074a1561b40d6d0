//! A Synod process.
//!
//! Each process runs the two phases of the obstruction-free consensus
//! algorithm. A proposer first reads with a fresh ballot and collects the
//! estimates of a majority, adopting the estimate with the highest ballot.
//! It then imposes that value on a majority and decides once a majority has
//! acknowledged it. Any process that has seen a higher ballot answers with
//! `Abort`, and the proposer retries with a larger ballot unless it has been
//! put on hold.

use kestrel_concurrency::{ActorRef, Behavior, Context, Transition};
use kestrel_core::BehaviorError;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use crate::gatherer::Delivery;

/// A proposed value
pub type Value = u8;

/// Ballot number; ballots of process `i` are `i, i + n, i + 2n, ...`
pub type Ballot = i64;

/// Protocol of a Synod process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessMessage {
    /// All processes, indexed by `pid - 1`, and the gatherer
    Init {
        /// Every process of the run
        peers: Arc<[ActorRef<ProcessMessage>]>,
        /// Receiver of decisions
        gatherer: ActorRef<Delivery>,
    },
    /// Propose a random value
    Launch,
    /// Become fault-prone
    Crash {
        /// Chance of crashing after each handled message
        probability: f64,
    },
    /// Stop proposing after an abort
    Hold,
    /// First phase request
    Read {
        /// Ballot of the proposer
        ballot: Ballot,
        /// Proposer id
        from: usize,
    },
    /// A read or impose was rejected
    Abort {
        /// The rejected ballot
        ballot: Ballot,
    },
    /// First phase answer carrying the current estimate
    Gather {
        /// Ballot being answered
        ballot: Ballot,
        /// Ballot under which `estimate` was imposed
        est_ballot: Ballot,
        /// Current estimate, if any value was imposed
        estimate: Option<Value>,
        /// Answering process
        from: usize,
    },
    /// Second phase request
    Impose {
        /// Ballot of the proposer
        ballot: Ballot,
        /// Value to impose
        value: Value,
        /// Proposer id
        from: usize,
    },
    /// Second phase answer
    Ack {
        /// Ballot being acknowledged
        ballot: Ballot,
        /// Acknowledging process
        from: usize,
    },
    /// A value was decided
    Decide {
        /// The decided value
        value: Value,
    },
}

/// Behavior of process `pid` among `n`
pub struct Process {
    pid: usize,
    n: usize,
    seed: u64,
}

impl Process {
    /// Process `pid` (1-based) drawing its random choices from `seed`
    pub fn new(pid: usize, n: usize, seed: u64) -> Self {
        Self { pid, n, seed }
    }
}

/// Mutable state of a process
pub struct ProcessState {
    rng: StdRng,
    peers: Option<Arc<[ActorRef<ProcessMessage>]>>,
    gatherer: Option<ActorRef<Delivery>>,
    ballot: Ballot,
    proposal: Option<Value>,
    read_ballot: Ballot,
    impose_ballot: Ballot,
    estimate: Option<Value>,
    // Indexed by pid
    states: Vec<(Option<Value>, Ballot)>,
    states_collected: usize,
    acks_collected: usize,
    crash_probability: Option<f64>,
    on_hold: bool,
}

impl ProcessState {
    /// Current ballot
    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    /// Current estimate
    pub fn estimate(&self) -> Option<Value> {
        self.estimate
    }

    /// Whether the process has been put on hold
    pub fn is_on_hold(&self) -> bool {
        self.on_hold
    }
}

const EMPTY_STATE: (Option<Value>, Ballot) = (None, 0);

impl Process {
    fn quorum(&self) -> usize {
        self.n / 2 + 1
    }

    fn broadcast(
        &self,
        state: &ProcessState,
        message: ProcessMessage,
        ctx: &mut Context<'_, ProcessMessage>,
    ) {
        if let Some(peers) = &state.peers {
            for peer in peers.iter() {
                ctx.tell(peer, message.clone());
            }
        }
    }

    fn reply(
        &self,
        state: &ProcessState,
        to: usize,
        message: ProcessMessage,
        ctx: &mut Context<'_, ProcessMessage>,
    ) {
        match state
            .peers
            .as_ref()
            .and_then(|peers| to.checked_sub(1).and_then(|i| peers.get(i)))
        {
            Some(peer) => ctx.tell(peer, message),
            None => debug!("Process {} has no peer {}", self.pid, to),
        }
    }

    fn propose(&self, state: &mut ProcessState, ctx: &mut Context<'_, ProcessMessage>) {
        state.ballot += self.n as Ballot;
        state.states.fill(EMPTY_STATE);
        state.states_collected = 0;
        state.acks_collected = 0;
        let read = ProcessMessage::Read {
            ballot: state.ballot,
            from: self.pid,
        };
        self.broadcast(state, read, ctx);
    }

    /// Crash with the configured probability if fault-prone
    fn try_crash(&self, mut state: ProcessState) -> Transition<ProcessState> {
        if let Some(probability) = state.crash_probability {
            if state.rng.random::<f64>() <= probability {
                info!("Process {} crashed", self.pid);
                return Transition::stop(state);
            }
        }
        Transition::next(state)
    }

    fn rejects(&self, state: &ProcessState, ballot: Ballot) -> bool {
        state.read_ballot > ballot || state.impose_ballot > ballot
    }
}

impl Behavior for Process {
    type Message = ProcessMessage;
    type State = ProcessState;

    fn init(&self, _ctx: &mut Context<'_, ProcessMessage>) -> Result<ProcessState, BehaviorError> {
        let offset = self.pid as Ballot - self.n as Ballot;
        Ok(ProcessState {
            rng: StdRng::seed_from_u64(self.seed),
            peers: None,
            gatherer: None,
            ballot: offset,
            proposal: None,
            read_ballot: 0,
            impose_ballot: offset,
            estimate: None,
            states: vec![EMPTY_STATE; self.n + 1],
            states_collected: 0,
            acks_collected: 0,
            crash_probability: None,
            on_hold: false,
        })
    }

    fn receive(
        &self,
        mut state: ProcessState,
        message: ProcessMessage,
        ctx: &mut Context<'_, ProcessMessage>,
    ) -> Result<Transition<ProcessState>, BehaviorError> {
        let transition = match message {
            ProcessMessage::Init { peers, gatherer } => {
                state.peers = Some(peers);
                state.gatherer = Some(gatherer);
                Transition::next(state)
            }
            ProcessMessage::Crash { probability } => {
                state.crash_probability = Some(probability);
                self.try_crash(state)
            }
            ProcessMessage::Hold => {
                state.on_hold = true;
                Transition::next(state)
            }
            ProcessMessage::Launch => {
                let value = state.rng.random_range(0..2);
                info!("Process {} proposes {}", self.pid, value);
                state.proposal = Some(value);
                self.propose(&mut state, ctx);
                self.try_crash(state)
            }
            ProcessMessage::Read { ballot, from } => {
                let answer = if self.rejects(&state, ballot) {
                    ProcessMessage::Abort { ballot }
                } else {
                    state.read_ballot = ballot;
                    ProcessMessage::Gather {
                        ballot,
                        est_ballot: state.impose_ballot,
                        estimate: state.estimate,
                        from: self.pid,
                    }
                };
                self.reply(&state, from, answer, ctx);
                self.try_crash(state)
            }
            ProcessMessage::Abort { ballot } => {
                if ballot != state.ballot {
                    return Ok(Transition::next(state));
                }
                if !state.on_hold {
                    self.propose(&mut state, ctx);
                }
                self.try_crash(state)
            }
            ProcessMessage::Gather {
                ballot,
                est_ballot,
                estimate,
                from,
            } => {
                if ballot != state.ballot {
                    return Ok(Transition::next(state));
                }
                state.states_collected += 1;
                if let Some(slot) = state.states.get_mut(from) {
                    *slot = (estimate, est_ballot);
                }

                if state.states_collected == self.quorum() {
                    // First entry wins among equal ballots
                    let highest = state
                        .states
                        .iter()
                        .copied()
                        .reduce(|best, next| if next.1 > best.1 { next } else { best });
                    if let Some((Some(value), est_ballot)) = highest {
                        if est_ballot > 0 {
                            state.proposal = Some(value);
                        }
                    }
                    state.states.fill(EMPTY_STATE);
                    state.states_collected = 0;

                    if let Some(value) = state.proposal {
                        let impose = ProcessMessage::Impose {
                            ballot: state.ballot,
                            value,
                            from: self.pid,
                        };
                        self.broadcast(&state, impose, ctx);
                    }
                }
                self.try_crash(state)
            }
            ProcessMessage::Impose {
                ballot,
                value,
                from,
            } => {
                let answer = if self.rejects(&state, ballot) {
                    ProcessMessage::Abort { ballot }
                } else {
                    state.estimate = Some(value);
                    state.impose_ballot = ballot;
                    ProcessMessage::Ack {
                        ballot,
                        from: self.pid,
                    }
                };
                self.reply(&state, from, answer, ctx);
                self.try_crash(state)
            }
            ProcessMessage::Ack { ballot, .. } => {
                if ballot != state.ballot {
                    return Ok(Transition::next(state));
                }
                state.acks_collected += 1;
                if state.acks_collected == self.quorum() {
                    if let Some(value) = state.proposal {
                        self.broadcast(&state, ProcessMessage::Decide { value }, ctx);
                    }
                }
                self.try_crash(state)
            }
            ProcessMessage::Decide { value } => {
                self.broadcast(&state, ProcessMessage::Decide { value }, ctx);
                info!("Process {} decided {}", self.pid, value);
                if let Some(gatherer) = &state.gatherer {
                    ctx.tell(
                        gatherer,
                        Delivery {
                            from: self.pid,
                            value,
                        },
                    );
                }
                Transition::stop(state)
            }
        };
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_testkit::{TestKit, TestProbe, DEFAULT_TIMEOUT};
    use std::time::Duration;

    struct Harness {
        kit: TestKit,
        process: ActorRef<ProcessMessage>,
        peers: Vec<TestProbe<ProcessMessage>>,
        gatherer: TestProbe<Delivery>,
    }

    /// Process 1 of 3 whose peers (itself included) are probes
    fn harness() -> Harness {
        let kit = TestKit::new();
        let process = kit.spawn(Process::new(1, 3, 7)).unwrap();
        let peers: Vec<_> = (0..3).map(|_| kit.probe::<ProcessMessage>().unwrap()).collect();
        let gatherer = kit.probe::<Delivery>().unwrap();
        let refs: Arc<[ActorRef<ProcessMessage>]> = peers.iter().map(|p| p.actor_ref()).collect();
        kit.tell(
            &process,
            ProcessMessage::Init {
                peers: refs,
                gatherer: gatherer.actor_ref(),
            },
        )
        .unwrap();
        Harness {
            kit,
            process,
            peers,
            gatherer,
        }
    }

    fn expect_all(peers: &[TestProbe<ProcessMessage>], expected: &ProcessMessage) {
        for peer in peers {
            assert_eq!(
                &peer.expect_message(expected.clone(), DEFAULT_TIMEOUT).unwrap(),
                expected
            );
        }
    }

    #[test]
    fn test_proposal_runs_both_phases() {
        let h = harness();
        h.kit.tell(&h.process, ProcessMessage::Launch).unwrap();
        // Ballots of process 1 of 3 start at 1 - 3 and advance by 3
        expect_all(&h.peers, &ProcessMessage::Read { ballot: 1, from: 1 });

        // Peer 2 already accepted 1 under ballot 2 which wins over no estimate
        for (from, estimate, est_ballot) in [(3, None, 0), (2, Some(1), 2)] {
            h.kit
                .tell(
                    &h.process,
                    ProcessMessage::Gather {
                        ballot: 1,
                        est_ballot,
                        estimate,
                        from,
                    },
                )
                .unwrap();
        }
        expect_all(
            &h.peers,
            &ProcessMessage::Impose {
                ballot: 1,
                value: 1,
                from: 1,
            },
        );

        for from in [2, 3] {
            h.kit
                .tell(&h.process, ProcessMessage::Ack { ballot: 1, from })
                .unwrap();
        }
        expect_all(&h.peers, &ProcessMessage::Decide { value: 1 });
        for peer in &h.peers {
            peer.expect_no_message(Duration::ZERO).unwrap();
        }

        // Deciding only happens on receipt of Decide
        assert!(h.gatherer.receive_all().is_empty());
        h.kit
            .tell(&h.process, ProcessMessage::Decide { value: 1 })
            .unwrap();
        assert_eq!(
            h.gatherer
                .expect_message(Delivery { from: 1, value: 1 }, DEFAULT_TIMEOUT)
                .unwrap(),
            Delivery { from: 1, value: 1 }
        );
        h.kit.run_until_idle();
        assert!(!h.process.is_alive());
    }

    #[test]
    fn test_stale_ballots_are_aborted() {
        let h = harness();
        h.kit
            .tell(&h.process, ProcessMessage::Read { ballot: 5, from: 2 })
            .unwrap();
        assert!(matches!(
            h.peers[1].expect_message_matching(|_| true, DEFAULT_TIMEOUT).unwrap(),
            ProcessMessage::Gather {
                ballot: 5,
                est_ballot: -2,
                estimate: None,
                from: 1
            }
        ));

        h.kit
            .tell(&h.process, ProcessMessage::Read { ballot: 3, from: 3 })
            .unwrap();
        assert_eq!(
            h.peers[2]
                .expect_message(ProcessMessage::Abort { ballot: 3 }, DEFAULT_TIMEOUT)
                .unwrap(),
            ProcessMessage::Abort { ballot: 3 }
        );

        h.kit
            .tell(
                &h.process,
                ProcessMessage::Impose {
                    ballot: 4,
                    value: 0,
                    from: 3,
                },
            )
            .unwrap();
        assert_eq!(
            h.peers[2]
                .expect_message(ProcessMessage::Abort { ballot: 4 }, DEFAULT_TIMEOUT)
                .unwrap(),
            ProcessMessage::Abort { ballot: 4 }
        );
    }

    #[test]
    fn test_abort_retries_unless_on_hold() {
        let h = harness();
        h.kit.tell(&h.process, ProcessMessage::Launch).unwrap();
        for peer in &h.peers {
            peer.receive_messages(1, DEFAULT_TIMEOUT).unwrap();
        }

        // Aborts for other ballots are ignored
        h.kit
            .tell(&h.process, ProcessMessage::Abort { ballot: 7 })
            .unwrap();
        h.peers[0].expect_no_message(Duration::ZERO).unwrap();

        h.kit
            .tell(&h.process, ProcessMessage::Abort { ballot: 1 })
            .unwrap();
        expect_all(&h.peers, &ProcessMessage::Read { ballot: 4, from: 1 });

        h.kit.tell(&h.process, ProcessMessage::Hold).unwrap();
        h.kit
            .tell(&h.process, ProcessMessage::Abort { ballot: 4 })
            .unwrap();
        for peer in &h.peers {
            peer.expect_no_message(Duration::ZERO).unwrap();
        }
        assert!(h.process.is_alive());
    }

    #[test]
    fn test_certain_crash_stops_the_process() {
        let h = harness();
        h.kit
            .tell(&h.process, ProcessMessage::Crash { probability: 1.0 })
            .unwrap();
        h.kit.run_until_idle();
        assert!(!h.process.is_alive());

        // Messages after the crash are dead letters, not errors
        assert!(h.kit.tell(&h.process, ProcessMessage::Launch).is_ok());
        for peer in &h.peers {
            peer.expect_no_message(Duration::ZERO).unwrap();
        }
    }
}
