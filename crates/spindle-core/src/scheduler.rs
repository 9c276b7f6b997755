//! Dispatcher: admission, settlement, retries and drain.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::lock;
use crate::queue::{Backlog, RetryMode, RetryPolicy, TaskRecord, TaskState};
use crate::stats::SchedulerStats;
use crate::task::{Abandoned, AttemptOutcome, ErasedJob, TaskHandle, TypedJob, Work};

/// Runs submitted work with at most `limit` tasks in flight.
///
/// Work beyond the limit waits in a FIFO backlog and is admitted as running
/// tasks settle. Each task settles on its own [`TaskHandle`]; one task's
/// failure never affects another.
///
/// `Scheduler` is a cheap handle: clones share the same backlog and limit.
///
/// # Example
/// ```
/// use spindle_core::Scheduler;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let scheduler = Scheduler::new(2)?;
///
/// let mut handles = Vec::new();
/// for i in 0..5u32 {
///     handles.push(scheduler.submit(move || async move { Ok::<_, std::io::Error>(i * 2) })?);
/// }
///
/// for (i, handle) in handles.into_iter().enumerate() {
///     assert_eq!(handle.await?, i as u32 * 2);
/// }
///
/// scheduler.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    backlog: Mutex<Backlog>,
    retry: RetryPolicy,
    runtime: Handle,

    /// `true` while nothing is running, queued, or parked for retry.
    idle: watch::Sender<bool>,

    cancel: CancellationToken,
}

impl Scheduler {
    /// Scheduler with `limit` slots and no retries.
    ///
    /// Must be called from within a Tokio runtime; every task is spawned on
    /// that runtime.
    pub fn new(limit: usize) -> Result<Self, SchedulerError> {
        Self::with_config(SchedulerConfig::new(limit))
    }

    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let (idle, _) = watch::channel(true);

        info!(
            concurrency = config.concurrency,
            retries = config.retry.retries,
            mode = ?config.retry.mode,
            "scheduler created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                backlog: Mutex::new(Backlog::new(config.concurrency)),
                retry: config.retry,
                runtime,
                idle,
                cancel: CancellationToken::new(),
            }),
        })
    }

    /// Submit work using the scheduler's retry budget.
    ///
    /// Starts right away if a slot is free, otherwise joins the tail of the
    /// backlog. Fails with [`SchedulerError::Closed`] after `close` or
    /// `shutdown`.
    pub fn submit<W: Work>(
        &self,
        work: W,
    ) -> Result<TaskHandle<W::Output, W::Error>, SchedulerError> {
        self.submit_with_retries(work, self.inner.retry.retries)
    }

    /// Submit work with its own retry budget.
    pub fn submit_with_retries<W: Work>(
        &self,
        work: W,
        retries: u32,
    ) -> Result<TaskHandle<W::Output, W::Error>, SchedulerError> {
        let (reply, result) = oneshot::channel();
        let job: Arc<dyn ErasedJob> = Arc::new(TypedJob::new(work, reply));

        let mut backlog = self.inner.backlog();
        if backlog.is_closed() {
            debug!("submission rejected, scheduler is closed");
            return Err(SchedulerError::Closed);
        }

        let id = backlog.allocate_task_id();
        let (record, state) = TaskRecord::new(id, job, retries.saturating_add(1));
        debug!(task = %id, retries, "task submitted");

        backlog.push(record);
        self.inner.admit(&mut backlog);

        Ok(TaskHandle::new(id, state, result))
    }

    /// Stop accepting work and wait for everything already accepted.
    ///
    /// Submissions are refused as soon as this is called, before the returned
    /// future is polled. The future resolves once no task is running, queued,
    /// or waiting to retry. Calling it again is harmless.
    pub fn close(&self) -> impl Future<Output = ()> + Send + use<> {
        let newly_closed = {
            let mut backlog = self.inner.backlog();
            backlog.close()
        };
        if newly_closed {
            info!("scheduler closed, draining");
        }
        self.wait_idle()
    }

    /// Close, drop queued work, stop retries, then wait for in-flight work.
    ///
    /// Queued and backoff-parked tasks settle with
    /// [`TaskError::Cancelled`](crate::TaskError::Cancelled). Running work is
    /// not interrupted: it sees [`cancellation_token`](Self::cancellation_token)
    /// fire and settles however it chooses, without further retries.
    pub fn shutdown(&self) -> impl Future<Output = ()> + Send + use<> {
        {
            let mut backlog = self.inner.backlog();
            let first = !backlog.is_cancelled();
            let dropped = backlog.cancel();
            for record in &dropped {
                record.job.abandon(Abandoned::Cancelled);
                record.settle(TaskState::Cancelled);
                backlog.record_settled(TaskState::Cancelled);
            }
            if first {
                info!(dropped = dropped.len(), "scheduler shutting down");
            }
            self.inner.publish_idle(&backlog);
        }
        self.inner.cancel.cancel();
        self.wait_idle()
    }

    /// Wait until nothing is running, queued, or waiting to retry, without
    /// closing.
    pub fn wait_idle(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut idle = self.inner.idle.subscribe();
        async move {
            loop {
                let drained = *idle.borrow_and_update();
                if drained {
                    return;
                }
                if idle.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    /// Token cancelled by [`shutdown`](Self::shutdown), for work that wants to
    /// abort early.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    pub fn limit(&self) -> usize {
        self.inner.backlog().limit()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.backlog().is_closed()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.backlog().stats()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("stats", &self.stats())
            .field("retry", &self.inner.retry)
            .finish()
    }
}

impl Inner {
    fn backlog(&self) -> MutexGuard<'_, Backlog> {
        lock(&self.backlog)
    }

    fn publish_idle(&self, backlog: &Backlog) {
        let drained = backlog.is_drained();
        let changed = self.idle.send_if_modified(|idle| {
            if *idle == drained {
                return false;
            }
            *idle = drained;
            true
        });
        if changed && drained {
            debug!(closed = backlog.is_closed(), "scheduler idle");
        }
    }

    /// Admission loop. Spawns in queue order while the lock is held, so
    /// tasks start in the order they were queued.
    fn admit(self: &Arc<Self>, backlog: &mut Backlog) {
        for record in backlog.admit() {
            self.launch(record);
        }
        self.publish_idle(backlog);
    }

    /// Spawn one attempt plus a watcher that settles it, panics included.
    fn launch(self: &Arc<Self>, record: TaskRecord) {
        debug!(
            task = %record.id,
            attempt = record.attempts,
            max_attempts = record.max_attempts,
            "task started"
        );

        let job = Arc::clone(&record.job);
        let attempt = self.runtime.spawn(async move { job.attempt().await });

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let outcome = match attempt.await {
                Ok(outcome) => outcome,
                Err(err) => interrupted(err),
            };
            inner.settle(record, outcome);
        });
    }

    fn settle(self: &Arc<Self>, record: TaskRecord, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Succeeded => {
                debug!(
                    task = %record.id,
                    attempt = record.attempts,
                    elapsed_ms = record.created_at.elapsed().as_millis() as u64,
                    "task succeeded"
                );
                self.finish(record, TaskState::Succeeded);
            }
            AttemptOutcome::Failed(error) => self.retry_or_fail(record, error),
            AttemptOutcome::Panicked(message) => {
                warn!(task = %record.id, attempt = record.attempts, %message, "task panicked");
                record.job.abandon(Abandoned::Panicked(message));
                self.finish(record, TaskState::Failed);
            }
            AttemptOutcome::Interrupted => {
                warn!(task = %record.id, "task dropped by the runtime");
                record.job.abandon(Abandoned::Cancelled);
                self.finish(record, TaskState::Cancelled);
            }
        }
    }

    /// Terminal settlement: free the slot and admit the next task.
    fn finish(self: &Arc<Self>, record: TaskRecord, state: TaskState) {
        record.settle(state);
        let mut backlog = self.backlog();
        backlog.release();
        backlog.record_settled(state);
        self.admit(&mut backlog);
    }

    fn retry_or_fail(self: &Arc<Self>, mut record: TaskRecord, error: String) {
        let mut backlog = self.backlog();

        if !record.can_retry() || backlog.is_cancelled() {
            drop(backlog);
            debug!(task = %record.id, attempts = record.attempts, %error, "task failed");
            record.job.fail();
            self.finish(record, TaskState::Failed);
            return;
        }

        warn!(
            task = %record.id,
            attempt = record.attempts,
            remaining = record.attempts_remaining(),
            %error,
            "attempt failed, retrying"
        );

        match self.retry.mode {
            RetryMode::InPlace => {
                drop(backlog);
                record.start_attempt();
                self.launch(record);
            }
            RetryMode::Requeue => match self.retry.delay_for(record.attempts - 1) {
                None => {
                    backlog.release();
                    backlog.push(record);
                    self.admit(&mut backlog);
                }
                Some(delay) => {
                    backlog.schedule_retry(&record);
                    self.admit(&mut backlog);
                    drop(backlog);
                    self.park(record, delay);
                }
            },
        }
    }

    /// Hold a task outside the backlog until its backoff delay elapses or
    /// the scheduler shuts down.
    fn park(self: &Arc<Self>, record: TaskRecord, delay: Duration) {
        debug!(
            task = %record.id,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = inner.cancel.cancelled() => {}
            }
            inner.resume(record);
        });
    }

    fn resume(self: &Arc<Self>, record: TaskRecord) {
        let mut backlog = self.backlog();
        backlog.retry_due();

        if backlog.is_cancelled() {
            record.job.abandon(Abandoned::Cancelled);
            record.settle(TaskState::Cancelled);
            backlog.record_settled(TaskState::Cancelled);
            self.publish_idle(&backlog);
            return;
        }

        backlog.push(record);
        self.admit(&mut backlog);
    }
}

fn interrupted(err: JoinError) -> AttemptOutcome {
    if !err.is_panic() {
        return AttemptOutcome::Interrupted;
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    AttemptOutcome::Panicked(message)
}
