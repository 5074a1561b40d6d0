//! Single-threaded dispatcher driven by the caller.
//!
//! Nothing runs until `run_once` or `run_until_idle` is called, which makes
//! message interleavings reproducible in tests.

use kestrel_core::SystemError;
use log::{error, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::{panic_message, Dispatcher, DispatcherStats, RunState, Runnable, TurnCounters};

/// Dispatcher whose run-queue is drained by explicit calls
pub struct ManualDispatcher {
    queue: Mutex<VecDeque<(Arc<dyn Runnable>, Instant)>>,
    throughput: usize,
    counters: TurnCounters,
    shut_down: AtomicBool,
}

impl ManualDispatcher {
    /// Create a dispatcher giving each actor `throughput` messages per turn
    pub fn new(throughput: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            throughput: throughput.max(1),
            counters: TurnCounters::default(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Run the task at the head of the run-queue for one turn.
    ///
    /// Returns `false` when the queue was empty.
    pub fn run_once(&self) -> bool {
        // The lock is released before the turn so the task can enqueue
        let next = self.queue.lock().pop_front();
        let (task, enqueued_at) = match next {
            Some(entry) => entry,
            None => return false,
        };

        let queued = enqueued_at.elapsed();
        let start = Instant::now();
        let throughput = self.throughput;
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run(throughput)));
        self.counters
            .record_turn(queued, start.elapsed(), result.is_err());

        match result {
            Ok(RunState::Pending) => {
                trace!("Re-queueing {}", task.describe());
                self.counters.record_dispatch();
                self.queue.lock().push_back((task, Instant::now()));
            }
            Ok(RunState::Idle) => {}
            Err(payload) => {
                error!(
                    "Turn of {} panicked: {}",
                    task.describe(),
                    panic_message(&*payload)
                );
            }
        }
        true
    }

    /// Run turns until the run-queue is empty or `max_turns` have run.
    ///
    /// Returns the number of turns executed.
    pub fn run_until_idle(&self, max_turns: usize) -> usize {
        let mut turns = 0;
        while turns < max_turns && self.run_once() {
            turns += 1;
        }
        turns
    }

    /// Number of tasks waiting in the run-queue
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for ManualDispatcher {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Dispatcher for ManualDispatcher {
    fn dispatch(&self, task: Arc<dyn Runnable>) -> Result<(), SystemError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SystemError::ShuttingDown);
        }
        self.counters.record_dispatch();
        self.queue.lock().push_back((task, Instant::now()));
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.queue.lock().is_empty()
    }

    fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.queue.lock().clear();
    }
}
