use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of a scheduler, from [`Scheduler::stats`](crate::Scheduler::stats).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub limit: usize,
    pub active: usize,
    pub queued: usize,
    pub retry_scheduled: usize,

    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,

    pub closed: bool,
}

impl SchedulerStats {
    /// Tasks accepted but not yet settled.
    pub fn pending(&self) -> usize {
        self.active + self.queued + self.retry_scheduled
    }

    pub fn settled(&self) -> u64 {
        self.succeeded + self.failed + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_and_settled_totals() {
        let stats = SchedulerStats {
            limit: 2,
            active: 2,
            queued: 3,
            retry_scheduled: 1,
            submitted: 9,
            succeeded: 2,
            failed: 1,
            cancelled: 0,
            closed: false,
        };
        assert_eq!(stats.pending(), 6);
        assert_eq!(stats.settled(), 3);
    }

    #[test]
    fn serializes_to_flat_json() {
        let stats = SchedulerStats {
            limit: 1,
            ..SchedulerStats::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["limit"], 1);
        assert_eq!(json["closed"], false);
    }
}
