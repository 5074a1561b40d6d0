//! Scheduling of runnable actors onto threads.
//!
//! This module provides:
//!
//! - The `Runnable` / `Dispatcher` seam between actor cells and threads
//! - A fixed worker pool pulling from a shared run-queue
//! - A manually stepped dispatcher for deterministic single-threaded runs
//! - A timer thread for delayed work (restart backoff, scheduled messages)

pub mod dispatcher;
pub mod manual;
pub mod timer;

use kestrel_core::SystemError;
use std::sync::Arc;
use std::time::Duration;

use crate::sync::{AtomicCounter, HighWaterMark};

pub use dispatcher::{DispatcherConfig, ThreadPoolDispatcher};
pub use manual::ManualDispatcher;
pub use timer::{Timer, TimerHandle};

/// Outcome of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing left to do; the task will be dispatched again by its next enqueue
    Idle,
    /// Work remains; put the task back at the end of the run-queue
    Pending,
}

/// Something a dispatcher can give a turn to (an actor cell).
pub trait Runnable: Send + Sync {
    /// Process up to `throughput` messages.
    fn run(&self, throughput: usize) -> RunState;

    /// Human readable name for logs.
    fn describe(&self) -> String;
}

/// Assigns runnable tasks to threads
pub trait Dispatcher: Send + Sync {
    /// Queue a task that just became runnable
    fn dispatch(&self, task: Arc<dyn Runnable>) -> Result<(), SystemError>;

    /// `true` when no task is queued or running
    fn is_idle(&self) -> bool;

    /// Snapshot of the turn statistics
    fn stats(&self) -> DispatcherStats;

    /// Stop accepting work and release the threads
    fn shutdown(&self);
}

/// Statistics about dispatched turns
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Number of turns queued (including re-queued ones)
    pub turns_dispatched: u64,

    /// Number of turns that ran to completion
    pub turns_completed: u64,

    /// Number of turns that panicked outside the actor's own guard
    pub turns_panicked: u64,

    /// Total turn execution time (microseconds)
    pub total_execution_time_us: u64,

    /// Total run-queue wait time (microseconds)
    pub total_queue_time_us: u64,

    /// Longest single turn (microseconds)
    pub max_execution_time_us: u64,
}

#[derive(Debug, Default)]
pub(crate) struct TurnCounters {
    dispatched: AtomicCounter,
    completed: AtomicCounter,
    panicked: AtomicCounter,
    execution_us: AtomicCounter,
    queue_us: AtomicCounter,
    max_execution_us: HighWaterMark,
}

impl TurnCounters {
    pub(crate) fn record_dispatch(&self) {
        self.dispatched.increment();
    }

    pub(crate) fn record_turn(&self, queued: Duration, executed: Duration, panicked: bool) {
        self.queue_us.add(queued.as_micros() as u64);
        self.execution_us.add(executed.as_micros() as u64);
        self.max_execution_us.record(executed.as_micros() as usize);
        if panicked {
            self.panicked.increment();
        } else {
            self.completed.increment();
        }
    }

    pub(crate) fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            turns_dispatched: self.dispatched.get(),
            turns_completed: self.completed.get(),
            turns_panicked: self.panicked.get(),
            total_execution_time_us: self.execution_us.get(),
            total_queue_time_us: self.queue_us.get(),
            max_execution_time_us: self.max_execution_us.get() as u64,
        }
    }
}

/// Extract a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<unknown panic>".to_string()
    }
}
