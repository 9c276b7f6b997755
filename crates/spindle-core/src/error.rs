use std::fmt;

use thiserror::Error;

/// Errors raised by the scheduler itself.
///
/// Task failures never turn into a `SchedulerError`; they stay on the
/// failing task's [`TaskHandle`](crate::TaskHandle) as a [`TaskError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Construction parameters were rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The scheduler was built outside of a Tokio runtime.
    #[error("no tokio runtime available to run tasks on")]
    NoRuntime,

    /// `submit` was called after `close` or `shutdown`.
    #[error("scheduler is closed")]
    Closed,
}

/// How a single task failed to produce a value.
#[derive(Debug)]
pub enum TaskError<E> {
    /// The task's own error from its last attempt, unchanged.
    Failed(E),

    /// The scheduler shut down before the task could settle.
    Cancelled,

    /// The work panicked. Panics are never retried.
    Panicked(String),
}

impl<E> TaskError<E> {
    /// The task's own error, if that is why it failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_failure(&self) -> Option<&E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    pub fn is_panicked(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }
}

impl<E: fmt::Display> fmt::Display for TaskError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Failed(e) => e.fmt(f),
            TaskError::Cancelled => f.write_str("task cancelled before it settled"),
            TaskError::Panicked(msg) => write!(f, "task panicked: {msg}"),
        }
    }
}

impl<E> std::error::Error for TaskError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskError::Failed(e) => e.source(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("upstream said no")]
    struct Upstream;

    #[test]
    fn failed_displays_the_task_error_verbatim() {
        let err: TaskError<Upstream> = TaskError::Failed(Upstream);
        assert_eq!(err.to_string(), "upstream said no");
        assert!(err.as_failure().is_some());
        assert!(err.into_inner().is_some());
    }

    #[test]
    fn cancelled_and_panicked_carry_no_task_error() {
        let cancelled: TaskError<Upstream> = TaskError::Cancelled;
        assert!(cancelled.is_cancelled());
        assert!(cancelled.into_inner().is_none());

        let panicked: TaskError<Upstream> = TaskError::Panicked("boom".into());
        assert!(panicked.is_panicked());
        assert_eq!(panicked.to_string(), "task panicked: boom");
    }

    #[test]
    fn scheduler_error_messages() {
        assert_eq!(SchedulerError::Closed.to_string(), "scheduler is closed");
        assert!(
            SchedulerError::InvalidArgument("concurrency must be at least 1".into())
                .to_string()
                .contains("concurrency")
        );
    }
}
