//! Worker pool dispatcher.
//!
//! A fixed set of worker threads pulls runnable actors from one shared
//! run-queue. A task that still has work after its turn goes to the back of
//! the queue, so a busy actor cannot starve the others.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use kestrel_core::SystemError;
use log::{debug, error, info, trace};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use super::{panic_message, Dispatcher, DispatcherStats, RunState, Runnable, TurnCounters};

/// Configuration for the worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Number of worker threads
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Maximum messages an actor processes per turn
    #[serde(default = "default_throughput")]
    pub throughput: usize,

    /// Name prefix for worker threads
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,

    /// Whether to collect turn statistics
    #[serde(default = "default_collect_stats")]
    pub collect_stats: bool,
}

fn default_worker_threads() -> usize {
    num_cpus::get()
}

fn default_throughput() -> usize {
    5
}

fn default_thread_name_prefix() -> String {
    "kestrel-worker".to_string()
}

fn default_collect_stats() -> bool {
    true
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            throughput: default_throughput(),
            thread_name_prefix: default_thread_name_prefix(),
            collect_stats: default_collect_stats(),
        }
    }
}

/// A runnable waiting in the run-queue
struct Job {
    task: Arc<dyn Runnable>,
    enqueued_at: Instant,
}

impl Job {
    fn new(task: Arc<dyn Runnable>) -> Self {
        Self {
            task,
            enqueued_at: Instant::now(),
        }
    }
}

/// Worker context holding shared state for the worker loop
struct WorkerContext {
    receiver: Receiver<Job>,
    requeue: Sender<Job>,
    shutdown_flag: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    counters: Arc<TurnCounters>,
    throughput: usize,
    collect_stats: bool,
}

/// Dispatcher backed by a fixed pool of worker threads
pub struct ThreadPoolDispatcher {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    is_shutting_down: Arc<AtomicBool>,
    // Tasks queued or running
    pending: Arc<AtomicUsize>,
    counters: Arc<TurnCounters>,
    config: DispatcherConfig,
}

impl ThreadPoolDispatcher {
    /// Start a pool with `threads` workers and default settings
    pub fn new(threads: usize) -> Result<Self, SystemError> {
        Self::with_config(DispatcherConfig {
            worker_threads: threads,
            ..Default::default()
        })
    }

    /// Start a pool with the specified configuration
    pub fn with_config(config: DispatcherConfig) -> Result<Self, SystemError> {
        if config.worker_threads == 0 {
            return Err(SystemError::InvalidArgument(
                "dispatcher needs at least one worker thread".to_string(),
            ));
        }
        if config.throughput == 0 {
            return Err(SystemError::InvalidArgument(
                "dispatcher throughput cannot be zero".to_string(),
            ));
        }

        let (sender, receiver) = unbounded();
        let is_shutting_down = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));
        let counters = Arc::new(TurnCounters::default());

        info!(
            "Creating dispatcher with {} workers (throughput {})",
            config.worker_threads, config.throughput
        );

        let mut workers = Vec::with_capacity(config.worker_threads);
        let mut worker_ids = Vec::with_capacity(config.worker_threads);

        for id in 0..config.worker_threads {
            let ctx = WorkerContext {
                receiver: receiver.clone(),
                requeue: sender.clone(),
                shutdown_flag: Arc::clone(&is_shutting_down),
                pending: Arc::clone(&pending),
                counters: Arc::clone(&counters),
                throughput: config.throughput,
                collect_stats: config.collect_stats,
            };

            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, id))
                .spawn(move || Self::worker_loop(id, ctx))
                .map_err(|e| {
                    is_shutting_down.store(true, Ordering::SeqCst);
                    SystemError::ThreadSpawn(e.to_string())
                })?;

            worker_ids.push(handle.thread().id());
            workers.push(handle);
        }

        Ok(Self {
            sender,
            receiver,
            workers: Mutex::new(workers),
            worker_ids,
            is_shutting_down,
            pending,
            counters,
            config,
        })
    }

    /// Worker thread main loop
    fn worker_loop(id: usize, ctx: WorkerContext) {
        debug!("Worker {}: Starting", id);

        while !ctx.shutdown_flag.load(Ordering::Relaxed) {
            // Wake up every 100ms to check the shutdown flag
            let job = match ctx.receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let queue_time = job.enqueued_at.elapsed();
            let exec_start = Instant::now();
            let throughput = ctx.throughput;
            let task = job.task;

            let result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run(throughput)));
            let exec_time = exec_start.elapsed();

            if ctx.collect_stats {
                ctx.counters
                    .record_turn(queue_time, exec_time, result.is_err());
            }

            match result {
                Ok(RunState::Pending) => {
                    trace!("Worker {}: Re-queueing {}", id, task.describe());
                    if ctx.collect_stats {
                        ctx.counters.record_dispatch();
                    }
                    if ctx.requeue.send(Job::new(task)).is_err() {
                        ctx.pending.fetch_sub(1, Ordering::SeqCst);
                    }
                }
                Ok(RunState::Idle) => {
                    ctx.pending.fetch_sub(1, Ordering::SeqCst);
                }
                Err(payload) => {
                    error!(
                        "Worker {}: Turn of {} panicked: {}",
                        id,
                        task.describe(),
                        panic_message(&*payload)
                    );
                    ctx.pending.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }

        debug!("Worker {}: Shutting down", id);
    }

    /// Get the number of worker threads
    pub fn worker_count(&self) -> usize {
        self.worker_ids.len()
    }

    /// Maximum messages per turn
    pub fn throughput(&self) -> usize {
        self.config.throughput
    }

    /// Check if the pool is shutting down
    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Relaxed)
    }
}

impl Dispatcher for ThreadPoolDispatcher {
    fn dispatch(&self, task: Arc<dyn Runnable>) -> Result<(), SystemError> {
        if self.is_shutting_down() {
            return Err(SystemError::ShuttingDown);
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.config.collect_stats {
            self.counters.record_dispatch();
        }
        self.sender.send(Job::new(task)).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            SystemError::ShuttingDown
        })
    }

    fn is_idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    fn stats(&self) -> DispatcherStats {
        if self.config.collect_stats {
            self.counters.snapshot()
        } else {
            DispatcherStats::default()
        }
    }

    fn shutdown(&self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down dispatcher");

        let current = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            // A worker cannot join itself; it exits on its next flag check
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("Worker thread panicked during shutdown");
            }
        }

        // Release queued cells so their memory is reclaimed
        let mut dropped = 0;
        while self.receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {} queued turns at shutdown", dropped);
        }

        info!("Dispatcher shutdown complete");
    }
}

impl Drop for ThreadPoolDispatcher {
    fn drop(&mut self) {
        // Workers notice the flag within one poll interval
        self.is_shutting_down.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct CountingTask {
        remaining: AtomicUsize,
        runs: AtomicU64,
    }

    impl CountingTask {
        fn new(work: usize) -> Arc<Self> {
            Arc::new(Self {
                remaining: AtomicUsize::new(work),
                runs: AtomicU64::new(0),
            })
        }
    }

    impl Runnable for CountingTask {
        fn run(&self, throughput: usize) -> RunState {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let left = self.remaining.load(Ordering::SeqCst);
            let done = left.min(throughput);
            self.remaining.fetch_sub(done, Ordering::SeqCst);
            if left > done {
                RunState::Pending
            } else {
                RunState::Idle
            }
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    struct PanickingTask;

    impl Runnable for PanickingTask {
        fn run(&self, _throughput: usize) -> RunState {
            panic!("runtime bug");
        }

        fn describe(&self) -> String {
            "panicking".to_string()
        }
    }

    fn wait_idle(dispatcher: &ThreadPoolDispatcher) {
        let start = Instant::now();
        while !dispatcher.is_idle() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn pool(threads: usize, throughput: usize) -> ThreadPoolDispatcher {
        ThreadPoolDispatcher::with_config(DispatcherConfig {
            worker_threads: threads,
            throughput,
            thread_name_prefix: "test-worker".to_string(),
            collect_stats: true,
        })
        .unwrap()
    }

    #[test]
    fn test_task_is_requeued_until_drained() {
        let dispatcher = pool(2, 3);
        let task = CountingTask::new(10);

        dispatcher.dispatch(task.clone()).unwrap();
        wait_idle(&dispatcher);

        assert_eq!(task.remaining.load(Ordering::SeqCst), 0);
        // 10 messages at 3 per turn
        assert_eq!(task.runs.load(Ordering::SeqCst), 4);

        let stats = dispatcher.stats();
        assert_eq!(stats.turns_dispatched, 4);
        assert_eq!(stats.turns_completed, 4);
        dispatcher.shutdown();
    }

    #[test]
    fn test_panicking_turn_does_not_kill_worker() {
        let dispatcher = pool(1, 1);
        let task = CountingTask::new(1);

        dispatcher.dispatch(Arc::new(PanickingTask)).unwrap();
        dispatcher.dispatch(task.clone()).unwrap();
        wait_idle(&dispatcher);

        assert_eq!(task.remaining.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.stats().turns_panicked, 1);
        dispatcher.shutdown();
    }

    #[test]
    fn test_dispatch_after_shutdown_fails() {
        let dispatcher = pool(2, 1);
        assert_eq!(dispatcher.worker_count(), 2);
        dispatcher.shutdown();

        let result = dispatcher.dispatch(CountingTask::new(1));
        assert_eq!(result, Err(SystemError::ShuttingDown));
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        assert!(matches!(
            ThreadPoolDispatcher::new(0),
            Err(SystemError::InvalidArgument(_))
        ));

        let config = DispatcherConfig {
            worker_threads: 1,
            throughput: 0,
            ..Default::default()
        };
        assert!(matches!(
            ThreadPoolDispatcher::with_config(config),
            Err(SystemError::InvalidArgument(_))
        ));
    }
}
