//! Atomic counters used for runtime statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A counter that can be incremented and read atomically.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    /// Create a new atomic counter with an initial value.
    pub fn new(initial_value: u64) -> Self {
        Self {
            value: AtomicU64::new(initial_value),
        }
    }

    /// Increment the counter and return the new value.
    pub fn increment(&self) -> u64 {
        self.add(1)
    }

    /// Add `amount` and return the new value.
    pub fn add(&self, amount: u64) -> u64 {
        self.value.fetch_add(amount, Ordering::Relaxed) + amount
    }

    /// Get the current value of the counter.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Remembers the largest value ever recorded.
#[derive(Debug, Default)]
pub struct HighWaterMark {
    value: AtomicUsize,
}

impl HighWaterMark {
    /// Create an empty mark.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation; returns `true` if it raised the mark.
    pub fn record(&self, observed: usize) -> bool {
        self.value.fetch_max(observed, Ordering::SeqCst) < observed
    }

    /// Largest value recorded so far.
    pub fn get(&self) -> usize {
        self.value.load(Ordering::SeqCst)
    }
}
