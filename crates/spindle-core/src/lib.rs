//! spindle-core
//!
//! A bounded-concurrency async task scheduler for Tokio.
//!
//! Submit zero-argument async work; at most `limit` tasks run at once, the
//! rest wait in a FIFO backlog, failed attempts are retried a bounded number
//! of times, and every task settles independently on its own handle.
//!
//! # Modules
//! - **scheduler**: `Scheduler` (admission loop, settlement, close/shutdown)
//! - **task**: `Work` trait, `TaskId`, `TaskHandle`
//! - **queue**: lifecycle state, retry policy, backlog
//! - **config**: `SchedulerConfig`
//! - **stats**: `SchedulerStats` snapshots
//! - **error**: `SchedulerError`, `TaskError`
//!
//! # Logging
//! Events are emitted through `tracing`; install a subscriber in the
//! application to see them.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod config;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod task;

pub use config::SchedulerConfig;
pub use error::{SchedulerError, TaskError};
pub use queue::{Backoff, RetryMode, RetryPolicy, TaskState};
pub use scheduler::Scheduler;
pub use stats::SchedulerStats;
pub use task::{TaskHandle, TaskId, Work};

/// Lock without propagating poisoning. Critical sections here never leave
/// state half-updated, so a panic elsewhere does not invalidate it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
