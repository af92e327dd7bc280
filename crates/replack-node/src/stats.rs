use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::wait_node::NodeResult;

/// Tracker counters, updated lock-free from any thread.
#[derive(Debug, Default)]
pub struct TrackerStats {
    posted: AtomicU64,
    dispatched: AtomicU64,
    dispatch_failed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    duplicate_completions: AtomicU64,
    advances: AtomicU64,
}

/// Point-in-time copy of [`TrackerStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStatsSnapshot {
    pub posted: u64,
    pub dispatched: u64,
    pub dispatch_failed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub duplicate_completions: u64,
    pub advances: u64,
}

impl TrackerStatsSnapshot {
    /// Nodes that reached a terminal result.
    pub fn resolved(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out
    }
}

impl TrackerStats {
    pub fn record_posted(&self) {
        self.posted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failed(&self) {
        self.dispatch_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolved(&self, result: NodeResult) {
        let counter = match result {
            NodeResult::Pending => return,
            NodeResult::Success => &self.succeeded,
            NodeResult::TimedOut => &self.timed_out,
            _ => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_advance(&self) {
        self.advances.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TrackerStatsSnapshot {
        TrackerStatsSnapshot {
            posted: self.posted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dispatch_failed: self.dispatch_failed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            duplicate_completions: self.duplicate_completions.load(Ordering::Relaxed),
            advances: self.advances.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TrackerStats;
    use crate::wait_node::NodeResult;

    #[test]
    fn resolved_results_land_in_their_buckets() {
        let stats = TrackerStats::default();
        stats.record_resolved(NodeResult::Success);
        stats.record_resolved(NodeResult::Remote(-3));
        stats.record_resolved(NodeResult::Deserialize);
        stats.record_resolved(NodeResult::TimedOut);
        stats.record_resolved(NodeResult::Pending);

        let snap = stats.snapshot();
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.failed, 2);
        assert_eq!(snap.timed_out, 1);
        assert_eq!(snap.resolved(), 4);
    }
}
