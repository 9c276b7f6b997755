//! Task wrapper: the unit of work, its identity, and the handle callers await.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};

use crate::error::TaskError;
use crate::lock;
use crate::queue::TaskState;

/// A zero-argument asynchronous operation the scheduler can run.
///
/// Implemented for every `Fn() -> impl Future<Output = Result<T, E>>`, so
/// closures work directly:
///
/// ```ignore
/// scheduler.submit(|| async { fetch("https://example.com").await })?;
/// ```
///
/// With retries configured, `run` is called once per attempt. Making repeated
/// calls safe (idempotency) is up to the implementor.
#[async_trait]
pub trait Work: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Shown in logs for failed attempts; returned verbatim on the final one.
    type Error: fmt::Display + Send + 'static;

    async fn run(&self) -> Result<Self::Output, Self::Error>;
}

#[async_trait]
impl<F, Fut, T, E> Work for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    type Output = T;
    type Error = E;

    async fn run(&self) -> Result<T, E> {
        (self)().await
    }
}

/// Identity of a submitted task, unique within one scheduler.
///
/// Ids increase monotonically in submission order, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Future for the result of one submitted task.
///
/// Resolves to the task's value, or to [`TaskError::Failed`] carrying the error
/// of its last attempt. Dropping the handle does not cancel the task.
#[must_use = "the task runs regardless; drop the handle explicitly to ignore its result"]
pub struct TaskHandle<T, E> {
    id: TaskId,
    state: watch::Receiver<TaskState>,
    result: oneshot::Receiver<Result<T, TaskError<E>>>,
}

impl<T, E> TaskHandle<T, E> {
    pub(crate) fn new(
        id: TaskId,
        state: watch::Receiver<TaskState>,
        result: oneshot::Receiver<Result<T, TaskError<E>>>,
    ) -> Self {
        Self { id, state, result }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Current lifecycle state of the task.
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }
}

impl<T, E> fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The sender only disappears unsent if the runtime dropped the task.
        Pin::new(&mut self.result)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Cancelled)))
    }
}

/// Result of running a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    /// The value was delivered to the handle.
    Succeeded,

    /// The error is parked in the job until the dispatcher decides to
    /// retry or deliver it.
    Failed(String),

    Panicked(String),

    /// The runtime dropped the attempt (runtime shutdown).
    Interrupted,
}

/// Why a task is settled without a value or a task error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Abandoned {
    Cancelled,
    Panicked(String),
}

/// Type-erased job, so one backlog can hold work of any output type.
#[async_trait]
pub(crate) trait ErasedJob: Send + Sync {
    async fn attempt(&self) -> AttemptOutcome;

    /// Deliver the error of the last failed attempt.
    fn fail(&self);

    fn abandon(&self, reason: Abandoned);
}

pub(crate) struct TypedJob<W: Work> {
    work: W,
    last_error: Mutex<Option<W::Error>>,
    reply: Mutex<Option<oneshot::Sender<Result<W::Output, TaskError<W::Error>>>>>,
}

impl<W: Work> TypedJob<W> {
    pub(crate) fn new(
        work: W,
        reply: oneshot::Sender<Result<W::Output, TaskError<W::Error>>>,
    ) -> Self {
        Self {
            work,
            last_error: Mutex::new(None),
            reply: Mutex::new(Some(reply)),
        }
    }

    fn deliver(&self, result: Result<W::Output, TaskError<W::Error>>) {
        if let Some(reply) = lock(&self.reply).take() {
            // the caller may have dropped its handle
            let _ = reply.send(result);
        }
    }
}

#[async_trait]
impl<W: Work> ErasedJob for TypedJob<W> {
    async fn attempt(&self) -> AttemptOutcome {
        match self.work.run().await {
            Ok(value) => {
                self.deliver(Ok(value));
                AttemptOutcome::Succeeded
            }
            Err(error) => {
                let message = error.to_string();
                *lock(&self.last_error) = Some(error);
                AttemptOutcome::Failed(message)
            }
        }
    }

    fn fail(&self) {
        let error = lock(&self.last_error).take();
        match error {
            Some(error) => self.deliver(Err(TaskError::Failed(error))),
            None => self.deliver(Err(TaskError::Cancelled)),
        }
    }

    fn abandon(&self, reason: Abandoned) {
        let error = match reason {
            Abandoned::Cancelled => TaskError::Cancelled,
            Abandoned::Panicked(message) => TaskError::Panicked(message),
        };
        self.deliver(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct Countdown {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Work for Countdown {
        type Output = &'static str;
        type Error = String;

        async fn run(&self) -> Result<&'static str, String> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(format!("intentional failure (left={left})"));
            }
            Ok("done")
        }
    }

    fn handle_for<W: Work>(work: W) -> (Arc<TypedJob<W>>, TaskHandle<W::Output, W::Error>) {
        let (tx, rx) = oneshot::channel();
        let (_state_tx, state_rx) = watch::channel(TaskState::Queued);
        let job = Arc::new(TypedJob::new(work, tx));
        (job, TaskHandle::new(TaskId::new(1), state_rx, rx))
    }

    #[test]
    fn task_id_displays_with_prefix() {
        assert_eq!(TaskId::new(7).to_string(), "task-7");
        assert!(TaskId::new(1) < TaskId::new(2));
    }

    #[tokio::test]
    async fn closures_are_work() {
        let work = || async { Ok::<_, String>(42) };
        assert_eq!(work.run().await, Ok(42));
    }

    #[tokio::test]
    async fn success_is_delivered_to_the_handle() {
        let (job, handle) = handle_for(|| async { Ok::<_, String>(5) });

        assert_eq!(job.attempt().await, AttemptOutcome::Succeeded);
        assert_eq!(handle.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn only_the_last_error_is_delivered() {
        let (job, handle) = handle_for(Countdown {
            failures_left: AtomicU32::new(2),
        });

        assert!(matches!(job.attempt().await, AttemptOutcome::Failed(msg) if msg.contains("left=2")));
        assert!(matches!(job.attempt().await, AttemptOutcome::Failed(msg) if msg.contains("left=1")));
        job.fail();

        let err = handle.await.unwrap_err();
        assert_eq!(err.into_inner().unwrap(), "intentional failure (left=1)");
    }

    #[tokio::test]
    async fn abandon_resolves_the_handle() {
        let (job, handle) = handle_for(|| async { Ok::<_, String>(()) });
        job.abandon(Abandoned::Panicked("boom".into()));

        // later deliveries are ignored
        job.abandon(Abandoned::Cancelled);
        assert!(handle.await.unwrap_err().is_panicked());
    }

    #[tokio::test]
    async fn dropped_job_resolves_as_cancelled() {
        let (job, handle) = handle_for(|| async { Ok::<_, String>(()) });
        drop(job);
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
