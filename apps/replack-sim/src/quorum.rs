use std::collections::HashMap;
use std::sync::mpsc::Receiver;

use replack_core::SeqRange;
use replack_node::{AckEvent, WaitNode};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuorumReport {
    pub writes_with_quorum: u64,
    pub writes_without_quorum: u64,
    pub advances: u64,
    pub last_acked_seq: u64,
    pub max_round_trip_us: u64,
    pub mean_round_trip_us: u64,
}

#[derive(Debug, Default)]
struct Tally {
    succeeded: usize,
    settled: usize,
}

/// Majority-of-replicas bookkeeping over the tracker's event stream.
#[derive(Debug)]
pub struct QuorumWatcher {
    replicas: usize,
    open: HashMap<SeqRange, Tally>,
    report: QuorumReport,
    round_trips: u64,
    round_trip_total: u64,
}

impl QuorumWatcher {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas,
            open: HashMap::new(),
            report: QuorumReport::default(),
            round_trips: 0,
            round_trip_total: 0,
        }
    }

    pub fn majority(&self) -> usize {
        self.replicas / 2 + 1
    }

    pub fn observe(&mut self, event: AckEvent) {
        match event {
            AckEvent::NodeResolved(node) => self.on_resolved(&node),
            AckEvent::SequenceAdvanced { acked_seq, node } => {
                debug!(acked_seq, last = %node.range, "sequence advanced");
                self.report.advances += 1;
                self.report.last_acked_seq = acked_seq;
            }
        }
    }

    fn on_resolved(&mut self, node: &WaitNode) {
        if node.is_sentinel() {
            return;
        }
        if let Some(rt) = node.round_trip_us().filter(|_| node.result.is_success()) {
            self.round_trips += 1;
            self.round_trip_total += rt;
            self.report.max_round_trip_us = self.report.max_round_trip_us.max(rt);
        }

        let majority = self.majority();
        let tally = self.open.entry(node.range).or_default();
        tally.settled += 1;
        if node.result.is_success() {
            tally.succeeded += 1;
            if tally.succeeded == majority {
                debug!(seq = %node.range, "write reached quorum");
                self.report.writes_with_quorum += 1;
            }
        }
        if tally.settled == self.replicas {
            if tally.succeeded < majority {
                info!(seq = %node.range, succeeded = tally.succeeded, "write missed quorum");
                self.report.writes_without_quorum += 1;
            }
            self.open.remove(&node.range);
        }
    }

    pub fn finish(mut self) -> QuorumReport {
        if self.round_trips > 0 {
            self.report.mean_round_trip_us = self.round_trip_total / self.round_trips;
        }
        self.report
    }
}

/// Consumes events until the tracker, and with it the sender, is dropped.
pub fn watch(events: Receiver<AckEvent>, replicas: usize) -> QuorumReport {
    let mut watcher = QuorumWatcher::new(replicas);
    for event in events {
        watcher.observe(event);
    }
    watcher.finish()
}
