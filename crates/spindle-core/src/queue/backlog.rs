//! Capacity tracker and FIFO backlog.

use std::collections::VecDeque;

use super::{TaskRecord, TaskState};
use crate::stats::SchedulerStats;
use crate::task::TaskId;

/// Dispatcher-owned scheduling state.
///
/// Invariants:
/// - `0 <= active <= limit`, and `active` equals the number of Running tasks.
/// - A task is in `queue` iff it is Queued.
/// - `limit` never changes after construction.
///
/// Every method is a single read-modify-write; the scheduler calls them under
/// one lock.
pub(crate) struct Backlog {
    limit: usize,
    active: usize,
    queue: VecDeque<TaskRecord>,

    /// Tasks waiting out a backoff delay.
    retry_scheduled: usize,

    closed: bool,
    cancelled: bool,

    next_task_id: u64,

    submitted: u64,
    succeeded: u64,
    failed: u64,
    cancelled_tasks: u64,
}

impl Backlog {
    pub fn new(limit: usize) -> Self {
        debug_assert!(limit >= 1);
        Self {
            limit,
            active: 0,
            queue: VecDeque::new(),
            retry_scheduled: 0,
            closed: false,
            cancelled: false,
            next_task_id: 1,
            submitted: 0,
            succeeded: 0,
            failed: 0,
            cancelled_tasks: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Nothing running, queued, or waiting to be re-queued.
    pub fn is_drained(&self) -> bool {
        self.active == 0 && self.queue.is_empty() && self.retry_scheduled == 0
    }

    pub fn allocate_task_id(&mut self) -> TaskId {
        let id = TaskId::new(self.next_task_id);
        self.next_task_id += 1;
        self.submitted += 1;
        id
    }

    /// Append to the tail of the queue.
    pub fn push(&mut self, record: TaskRecord) {
        debug_assert!(record.state().is_pending());
        record.requeue();
        self.queue.push_back(record);
    }

    /// Admission loop: promote queued tasks while capacity remains.
    ///
    /// Returned records are already Running and counted as active, in the
    /// order they were queued.
    pub fn admit(&mut self) -> Vec<TaskRecord> {
        let mut started = Vec::new();
        while self.active < self.limit {
            let Some(mut record) = self.queue.pop_front() else {
                break;
            };
            self.active += 1;
            record.start_attempt();
            started.push(record);
        }
        started
    }

    /// Give back the slot of a settled (or requeued) task.
    ///
    /// This is the only place `active` goes down.
    pub fn release(&mut self) {
        debug_assert!(self.active > 0, "released a slot that was never taken");
        self.active = self.active.saturating_sub(1);
    }

    /// Release the slot and park the task outside the queue until its
    /// backoff delay elapses.
    pub fn schedule_retry(&mut self, record: &TaskRecord) {
        self.release();
        self.retry_scheduled += 1;
        record.schedule_retry();
    }

    /// A backoff delay elapsed; the task is no longer parked.
    pub fn retry_due(&mut self) {
        debug_assert!(self.retry_scheduled > 0);
        self.retry_scheduled = self.retry_scheduled.saturating_sub(1);
    }

    /// Count a task that reached a terminal state.
    pub fn record_settled(&mut self, state: TaskState) {
        match state {
            TaskState::Succeeded => self.succeeded += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Cancelled => self.cancelled_tasks += 1,
            TaskState::Queued | TaskState::Running | TaskState::RetryScheduled => {
                debug_assert!(false, "record_settled called with non-terminal {state:?}");
            }
        }
    }

    /// Refuse further submissions. Returns `true` the first time.
    pub fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    /// Close, stop retries, and hand back everything still queued.
    pub fn cancel(&mut self) -> Vec<TaskRecord> {
        self.closed = true;
        self.cancelled = true;
        self.queue.drain(..).collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            limit: self.limit,
            active: self.active,
            queued: self.queue.len(),
            retry_scheduled: self.retry_scheduled,
            submitted: self.submitted,
            succeeded: self.succeeded,
            failed: self.failed,
            cancelled: self.cancelled_tasks,
            closed: self.closed,
        }
    }
}
