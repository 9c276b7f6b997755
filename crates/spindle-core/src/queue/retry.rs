//! Retry policy: budget, placement, backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Where a failed task goes when it still has attempts left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Release the slot and append the task to the tail of the backlog.
    ///
    /// A flaky task can be overtaken by work submitted after it, so it never
    /// blocks the head of the queue.
    #[default]
    Requeue,

    /// Keep the slot and re-attempt immediately.
    ///
    /// Lower latency for the failing task; queued work waits longer.
    InPlace,
}

/// Delay inserted before a requeued retry.
///
/// Retry `n` (0-indexed) waits `first * factor^n`, clamped to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(rename = "first_ms", with = "millis")]
    pub first: Duration,

    /// Multiplicative growth factor, `>= 1.0`.
    pub factor: f64,

    #[serde(rename = "max_ms", with = "millis")]
    pub max: Duration,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            factor: 1.0,
            max: delay,
        }
    }

    /// Exponential growth from `first`, capped at `max`.
    pub fn exponential(first: Duration, factor: f64, max: Duration) -> Self {
        Self { first, factor, max }
    }

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = retry.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(SchedulerError::InvalidArgument(format!(
                "backoff factor must be a finite number >= 1.0, got {}",
                self.factor
            )));
        }
        Ok(())
    }
}

/// How failed attempts are retried.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first one. `0` means fail on first error.
    pub retries: u32,

    pub mode: RetryMode,

    /// Only applies to [`RetryMode::Requeue`].
    pub backoff: Option<Backoff>,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    /// Delay before the given retry, if any.
    ///
    /// `None` means the task goes straight back to the tail of the queue.
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        if self.mode != RetryMode::Requeue {
            return None;
        }
        self.backoff
            .map(|b| b.delay(retry))
            .filter(|d| !d.is_zero())
    }

    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        match &self.backoff {
            Some(backoff) => backoff.validate(),
            None => Ok(()),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_does_not_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 0);
        assert_eq!(policy.mode, RetryMode::Requeue);
        assert!(policy.backoff.is_none());
        assert_eq!(policy.delay_for(0), None);
    }

    #[test]
    fn exponential_backoff_increases_then_caps() {
        let backoff = Backoff::exponential(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(500),
        );

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(500));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn constant_backoff_never_grows() {
        let backoff = Backoff::constant(Duration::from_millis(50));
        assert_eq!(backoff.delay(0), backoff.delay(10));
    }

    #[test]
    fn in_place_mode_ignores_backoff() {
        let policy = RetryPolicy {
            retries: 3,
            mode: RetryMode::InPlace,
            backoff: Some(Backoff::constant(Duration::from_millis(50))),
        };
        assert_eq!(policy.delay_for(0), None);
    }

    #[test]
    fn zero_backoff_means_no_delay() {
        let policy = RetryPolicy {
            retries: 1,
            mode: RetryMode::Requeue,
            backoff: Some(Backoff::constant(Duration::ZERO)),
        };
        assert_eq!(policy.delay_for(0), None);
    }

    #[test]
    fn shrinking_factor_is_rejected() {
        let backoff = Backoff::exponential(Duration::from_millis(10), 0.5, Duration::from_secs(1));
        let err = backoff.validate().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument(_)));

        let backoff = Backoff::exponential(Duration::from_millis(10), f64::NAN, Duration::from_secs(1));
        assert!(backoff.validate().is_err());
    }

    #[test]
    fn backoff_serializes_durations_as_millis() {
        let backoff = Backoff::exponential(Duration::from_millis(250), 2.0, Duration::from_secs(4));
        let json = serde_json::to_value(backoff).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "first_ms": 250, "factor": 2.0, "max_ms": 4000 })
        );

        let parsed: Backoff = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, backoff);
    }
}
