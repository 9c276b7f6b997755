//! Scheduler configuration.
//!
//! [`SchedulerConfig`] can be built in code or deserialized as part of an
//! application's own config file:
//!
//! ```json
//! { "concurrency": 4, "retry": { "retries": 2, "backoff": { "first_ms": 100, "factor": 2.0, "max_ms": 2000 } } }
//! ```

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::queue::{Backoff, RetryMode, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running at once. Must be at least 1.
    pub concurrency: usize,

    /// Default retry behavior for submitted tasks.
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    /// One slot per available CPU, no retries.
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry.retries = retries;
        self
    }

    pub fn with_retry_mode(mut self, mode: RetryMode) -> Self {
        self.retry.mode = mode;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.retry.backoff = Some(backoff);
        self
    }

    /// Checks everything `Scheduler::with_config` would reject.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.concurrency < 1 {
            return Err(SchedulerError::InvalidArgument(format!(
                "concurrency must be at least 1, got {}",
                self.concurrency
            )));
        }
        self.retry.validate()
    }
}
