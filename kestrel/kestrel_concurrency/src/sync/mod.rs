//! Synchronization helpers shared by the scheduler and actor cells.

pub mod atomic;

pub use atomic::{AtomicCounter, HighWaterMark};
