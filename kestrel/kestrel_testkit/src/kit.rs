//! The test harness owning an actor system.

use kestrel_concurrency::actor::{from_fn, Behavior, MailboxConfig, Message, Transition};
use kestrel_concurrency::{ActorRef, ActorSystem, ManualDispatcher, RuntimeConfig, SpawnOptions};
use kestrel_core::{MailboxError, SystemError};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::TestKitError;
use crate::probe::{EventProbe, TestProbe, MAX_TURNS, POLL_INTERVAL};

/// Timeout used by `Drop` and suggested for expectations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Owns an actor system and drives it for tests.
///
/// In deterministic mode nothing runs until the kit or one of its probes
/// drives the dispatcher, and turns always run in the same order.
pub struct TestKit {
    system: ActorSystem,
    driver: Option<Arc<ManualDispatcher>>,
    terminated: AtomicBool,
}

impl TestKit {
    /// Deterministic kit with the default configuration
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Deterministic kit; the dispatcher throughput comes from `config`
    pub fn with_config(config: RuntimeConfig) -> Self {
        let dispatcher = Arc::new(ManualDispatcher::new(config.dispatcher.throughput));
        let system = ActorSystem::with_dispatcher("testkit", config, dispatcher.clone());
        Self {
            system,
            driver: Some(dispatcher),
            terminated: AtomicBool::new(false),
        }
    }

    /// Kit running on a pool of `workers` threads
    pub fn threaded(workers: usize) -> Result<Self, TestKitError> {
        let mut config = RuntimeConfig::default();
        config.dispatcher.worker_threads = workers.max(1);
        config.dispatcher.thread_name_prefix = "testkit-worker".to_string();
        Self::threaded_with_config(config)
    }

    /// Kit running on the thread pool described by `config`
    pub fn threaded_with_config(config: RuntimeConfig) -> Result<Self, TestKitError> {
        let system = ActorSystem::with_config("testkit", config)?;
        Ok(Self {
            system,
            driver: None,
            terminated: AtomicBool::new(false),
        })
    }

    /// The system under test
    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Whether turns run only when driven
    pub fn is_deterministic(&self) -> bool {
        self.driver.is_some()
    }

    /// Spawn a top-level actor with default options
    pub fn spawn<B: Behavior>(&self, behavior: B) -> Result<ActorRef<B::Message>, TestKitError> {
        Ok(self.system.spawn(behavior)?)
    }

    /// Spawn a top-level actor
    pub fn spawn_with<B: Behavior>(
        &self,
        behavior: B,
        options: SpawnOptions,
    ) -> Result<ActorRef<B::Message>, TestKitError> {
        Ok(self.system.spawn_with(behavior, options)?)
    }

    /// Send `message` to `target`; in deterministic mode nothing runs yet
    pub fn tell<M: Message>(&self, target: &ActorRef<M>, message: M) -> Result<(), MailboxError> {
        self.system.tell(target, message)
    }

    /// Run a single turn.
    ///
    /// Returns `false` when nothing was runnable, and always in threaded
    /// mode.
    pub fn step(&self) -> bool {
        match &self.driver {
            Some(dispatcher) => dispatcher.run_once(),
            None => false,
        }
    }

    /// Run turns until the run-queue is empty and return how many ran.
    ///
    /// In threaded mode this waits for the pool to go idle and returns 0.
    pub fn run_until_idle(&self) -> usize {
        match &self.driver {
            Some(dispatcher) => dispatcher.run_until_idle(MAX_TURNS),
            None => {
                if let Err(e) = self.system.await_idle(DEFAULT_TIMEOUT) {
                    warn!("System did not settle: {}", e);
                }
                0
            }
        }
    }

    /// Block until every mailbox is empty and no turn is queued or running.
    ///
    /// Deterministic kits keep driving while they wait so that messages
    /// from timers get processed.
    pub fn settle(&self, timeout: Duration) -> Result<(), TestKitError> {
        let dispatcher = match &self.driver {
            Some(dispatcher) => dispatcher,
            None => {
                return self.system.await_idle(timeout).map_err(|e| match e {
                    SystemError::Timeout(waited) => TestKitError::Timeout {
                        waited,
                        what: "the system to settle".to_string(),
                    },
                    other => TestKitError::System(other),
                })
            }
        };

        let deadline = Instant::now() + timeout;
        loop {
            dispatcher.run_until_idle(MAX_TURNS);
            if self.system.is_idle() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(TestKitError::Timeout {
                    waited: timeout,
                    what: "the system to settle".to_string(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Spawn a recording actor accepting messages of type `M`
    pub fn probe<M: Message>(&self) -> Result<TestProbe<M>, TestKitError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let actor = self.system.spawn_with(
            from_fn((), move |state, message: M, _ctx| {
                let _ = sender.send(message);
                Ok(Transition::next(state))
            }),
            SpawnOptions::new().with_mailbox(MailboxConfig::unbounded()),
        )?;
        debug!("Spawned probe {}", actor.path());
        Ok(TestProbe::new(actor, receiver, self.driver.clone()))
    }

    /// Subscribe to the system event stream
    pub fn event_probe(&self) -> EventProbe {
        EventProbe::new(self.system.subscribe(), self.driver.clone())
    }

    /// Wait up to `timeout` for the next message of `probe` and check it
    /// against `predicate`
    pub fn expect_message<M, P>(
        &self,
        probe: &TestProbe<M>,
        predicate: P,
        timeout: Duration,
    ) -> Result<M, TestKitError>
    where
        M: Message,
        P: FnOnce(&M) -> bool,
    {
        probe.expect_message_matching(predicate, timeout)
    }

    /// Stop every actor and release the system's threads
    pub fn shutdown(&self, timeout: Duration) -> Result<(), TestKitError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let wait = match &self.driver {
            Some(dispatcher) => {
                self.system.shutdown();
                let deadline = Instant::now() + timeout;
                loop {
                    dispatcher.run_until_idle(MAX_TURNS);
                    if self.system.actor_count() == 0 || Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                // Everything left has been driven; this only releases threads
                Duration::ZERO
            }
            None => timeout,
        };

        self.system.await_termination(wait).map_err(|e| match e {
            SystemError::Timeout(_) => TestKitError::Timeout {
                waited: timeout,
                what: "all actors to terminate".to_string(),
            },
            other => TestKitError::System(other),
        })
    }
}

impl Default for TestKit {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestKit {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown(DEFAULT_TIMEOUT) {
            warn!("Test kit shutdown incomplete: {}", e);
        }
    }
}

impl std::fmt::Debug for TestKit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestKit")
            .field("system", &self.system)
            .field("deterministic", &self.is_deterministic())
            .finish()
    }
}
