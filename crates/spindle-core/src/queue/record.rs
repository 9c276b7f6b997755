//! Task record: identity, retry budget and lifecycle of one task.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use super::TaskState;
use crate::task::{ErasedJob, TaskId};

/// Bookkeeping for a task while the scheduler owns it.
///
/// The record lives in the backlog while `Queued`, moves into the runtime
/// task that drives its attempt while `Running`, and is dropped once settled.
pub(crate) struct TaskRecord {
    pub id: TaskId,
    pub job: Arc<dyn ErasedJob>,

    /// Attempts started so far (including the current one if Running).
    pub attempts: u32,

    /// Retries plus the first attempt.
    pub max_attempts: u32,

    pub created_at: Instant,

    state: watch::Sender<TaskState>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        job: Arc<dyn ErasedJob>,
        max_attempts: u32,
    ) -> (Self, watch::Receiver<TaskState>) {
        let (state, state_rx) = watch::channel(TaskState::Queued);
        let record = Self {
            id,
            job,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            created_at: Instant::now(),
            state,
        };
        (record, state_rx)
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    pub fn can_retry(&self) -> bool {
        self.attempts_remaining() > 0
    }

    /// Mark as running and count the attempt.
    pub fn start_attempt(&mut self) {
        self.attempts += 1;
        self.set_state(TaskState::Running);
    }

    pub fn requeue(&self) {
        self.set_state(TaskState::Queued);
    }

    pub fn schedule_retry(&self) {
        self.set_state(TaskState::RetryScheduled);
    }

    pub fn settle(&self, state: TaskState) {
        debug_assert!(state.is_terminal());
        self.set_state(state);
    }

    fn set_state(&self, state: TaskState) {
        // handles may be gone; the record still tracks its own state
        self.state.send_replace(state);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::task::{Abandoned, AttemptOutcome};

    pub(crate) struct NoopJob;

    #[async_trait]
    impl ErasedJob for NoopJob {
        async fn attempt(&self) -> AttemptOutcome {
            AttemptOutcome::Succeeded
        }

        fn fail(&self) {}

        fn abandon(&self, _reason: Abandoned) {}
    }

    pub(crate) fn record(id: u64, max_attempts: u32) -> TaskRecord {
        TaskRecord::new(TaskId::new(id), Arc::new(NoopJob), max_attempts).0
    }

    #[test]
    fn new_record_is_queued_with_full_budget() {
        let record = record(1, 3);
        assert_eq!(record.state(), TaskState::Queued);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.attempts_remaining(), 3);
    }

    #[test]
    fn attempts_consume_the_budget() {
        let mut record = record(1, 2);

        record.start_attempt();
        assert_eq!(record.state(), TaskState::Running);
        assert!(record.can_retry());

        record.requeue();
        record.start_attempt();
        assert_eq!(record.attempts, 2);
        assert!(!record.can_retry());
    }

    #[test]
    fn zero_max_attempts_still_runs_once() {
        let record = record(1, 0);
        assert_eq!(record.max_attempts, 1);
    }

    #[test]
    fn handles_observe_transitions() {
        let (mut record, state_rx) = TaskRecord::new(TaskId::new(9), Arc::new(NoopJob), 2);

        record.start_attempt();
        assert_eq!(*state_rx.borrow(), TaskState::Running);

        record.schedule_retry();
        assert_eq!(*state_rx.borrow(), TaskState::RetryScheduled);

        record.settle(TaskState::Succeeded);
        assert_eq!(*state_rx.borrow(), TaskState::Succeeded);
    }
}
