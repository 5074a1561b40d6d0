//! Timer thread for delayed work.
//!
//! Used for restart backoff and `Context::schedule_once`. Entries live in a
//! min-heap keyed by deadline; one thread sleeps until the earliest one.

use kestrel_core::SystemError;
use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::panic_message;

type TimerTask = Box<dyn FnOnce() + Send>;

struct Entry {
    deadline: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: TimerTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the heap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

/// Handle to a scheduled task
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Prevent the task from running if it has not fired yet
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` was called
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A single background thread that runs tasks after a delay
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    /// Start the timer thread
    pub fn new(name: &str) -> Result<Self, SystemError> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState::default()),
            wakeup: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("{}-timer", name))
            .spawn(move || Self::timer_loop(worker))
            .map_err(|e| SystemError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn timer_loop(shared: Arc<TimerShared>) {
        debug!("Timer thread started");
        let mut state = shared.state.lock();

        loop {
            if state.shutdown {
                break;
            }

            let now = Instant::now();
            let next_deadline = state.heap.peek().map(|entry| entry.deadline);
            match next_deadline {
                None => {
                    shared.wakeup.wait(&mut state);
                }
                Some(deadline) if deadline > now => {
                    shared.wakeup.wait_until(&mut state, deadline);
                }
                Some(_) => {
                    let entry = match state.heap.pop() {
                        Some(entry) => entry,
                        None => continue,
                    };
                    if entry.cancelled.load(Ordering::SeqCst) {
                        continue;
                    }

                    // Run without the lock so the task may schedule more work
                    let task = entry.task;
                    drop(state);
                    if let Err(payload) =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(task))
                    {
                        error!("Timer task panicked: {}", panic_message(&*payload));
                    }
                    state = shared.state.lock();
                }
            }
        }

        debug!("Timer thread stopped with {} entries", state.heap.len());
        state.heap.clear();
    }

    /// Run `task` once after `delay`
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<TimerHandle, SystemError>
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now().checked_add(delay).ok_or_else(|| {
            SystemError::InvalidArgument(format!("timer delay {:?} is out of range", delay))
        })?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(SystemError::ShuttingDown);
        }
        Self::prune_cancelled(&mut state);

        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            deadline,
            seq,
            cancelled: Arc::clone(&cancelled),
            task: Box::new(task),
        });
        drop(state);
        self.shared.wakeup.notify_one();

        Ok(TimerHandle { cancelled })
    }

    // Cancelled entries are dropped eagerly once they make up half the heap
    fn prune_cancelled(state: &mut TimerState) {
        let cancelled = state
            .heap
            .iter()
            .filter(|entry| entry.cancelled.load(Ordering::SeqCst))
            .count();
        if cancelled > 0 && cancelled * 2 >= state.heap.len() {
            state
                .heap
                .retain(|entry| !entry.cancelled.load(Ordering::SeqCst));
        }
    }

    /// Number of entries not yet fired or cancelled
    pub fn scheduled(&self) -> usize {
        self.shared
            .state
            .lock()
            .heap
            .iter()
            .filter(|entry| !entry.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Stop the timer thread, discarding entries that have not fired
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.shared.wakeup.notify_all();

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Timer thread panicked");
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
