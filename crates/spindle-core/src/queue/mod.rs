//! Queue module: lifecycle state, retry policy, task records and the backlog.

mod backlog;
mod record;
mod retry;
mod state;

pub(crate) use backlog::Backlog;
pub(crate) use record::TaskRecord;
pub use retry::{Backoff, RetryMode, RetryPolicy};
pub use state::TaskState;
