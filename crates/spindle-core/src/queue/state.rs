//! Task lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle of a submitted task.
///
/// State transitions:
/// - Queued -> Running -> Succeeded
/// - Queued -> Running -> Queued -> Running (tail retry)
/// - Queued -> Running -> RetryScheduled -> Queued (tail retry with backoff)
/// - Queued -> Running -> Running (in-place retry)
/// - Queued -> Running -> Failed (retries exhausted, or the work panicked)
/// - Queued | RetryScheduled -> Cancelled (scheduler shut down)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the backlog for a free slot.
    Queued,

    /// Exactly one attempt is in flight.
    Running,

    /// Waiting out a backoff delay before being re-queued.
    RetryScheduled,

    /// Settled with a value.
    Succeeded,

    /// Settled with the last error.
    Failed,

    /// Dropped by shutdown before it could settle.
    Cancelled,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Does this task still hold or wait for capacity?
    pub fn is_pending(self) -> bool {
        !self.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());

        assert!(TaskState::Queued.is_pending());
        assert!(TaskState::Running.is_pending());
        assert!(TaskState::RetryScheduled.is_pending());
    }

    #[test]
    fn serializes_as_snake_case() {
        let s = serde_json::to_string(&TaskState::RetryScheduled).unwrap();
        assert_eq!(s, "\"retry_scheduled\"");
    }
}
