use std::fmt;

use replack_codec::result_code::RESULT_SUCCESS;
use replack_core::{SeqRange, ServerAddr};
use serde::{Deserialize, Serialize};

/// Where a wait node's request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// A real replica, `index` being its position in the fan-out list.
    Replica { server: ServerAddr, index: usize },
    /// Trailing marker of a write's fan-out; never sent anywhere.
    Sentinel,
}

/// Resolution state of a wait node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeResult {
    Pending,
    Success,
    /// The replica answered with a non-success status code.
    Remote(i32),
    /// The transport completed without a response payload.
    ResponseTimedOut,
    /// The response payload did not decode as a result code.
    Deserialize,
    /// The transport refused the request at submission.
    DispatchFailed,
    /// The deadline passed while the node sat at the queue head.
    TimedOut,
}

impl NodeResult {
    /// Maps a replica status code.
    pub fn from_code(code: i32) -> Self {
        if code == RESULT_SUCCESS {
            NodeResult::Success
        } else {
            NodeResult::Remote(code)
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, NodeResult::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, NodeResult::Success)
    }
}

impl fmt::Display for NodeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeResult::Pending => f.write_str("pending"),
            NodeResult::Success => f.write_str("success"),
            NodeResult::Remote(code) => write!(f, "remote({code})"),
            NodeResult::ResponseTimedOut => f.write_str("response-timed-out"),
            NodeResult::Deserialize => f.write_str("deserialize-error"),
            NodeResult::DispatchFailed => f.write_str("dispatch-failed"),
            NodeResult::TimedOut => f.write_str("timed-out"),
        }
    }
}

/// One tracked request: a write's fan-out to one replica, or its sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitNode {
    pub range: SeqRange,
    pub target: Target,
    pub send_time_us: u64,
    /// Zero until the node resolves.
    pub receive_time_us: u64,
    pub timeout_us: u64,
    pub result: NodeResult,
}

impl WaitNode {
    /// Creates a pending node.
    pub fn new(range: SeqRange, target: Target, send_time_us: u64, timeout_us: u64) -> Self {
        Self {
            range,
            target,
            send_time_us,
            receive_time_us: 0,
            timeout_us,
            result: NodeResult::Pending,
        }
    }

    pub fn deadline_us(&self) -> u64 {
        self.send_time_us.saturating_add(self.timeout_us)
    }

    /// Whether a still-pending node has outlived its deadline at `now_us`.
    pub fn is_expired(&self, now_us: u64) -> bool {
        self.result.is_pending() && now_us > self.deadline_us()
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self.target, Target::Sentinel)
    }

    pub fn server(&self) -> Option<ServerAddr> {
        match self.target {
            Target::Replica { server, .. } => Some(server),
            Target::Sentinel => None,
        }
    }

    /// Send-to-resolve latency; `None` while pending.
    pub fn round_trip_us(&self) -> Option<u64> {
        (!self.result.is_pending()).then(|| self.receive_time_us.saturating_sub(self.send_time_us))
    }

    /// Moves a pending node to `result`. Returns `false` if already resolved.
    pub(crate) fn resolve(&mut self, result: NodeResult, now_us: u64) -> bool {
        if !self.result.is_pending() || result.is_pending() {
            return false;
        }
        self.result = result;
        self.receive_time_us = now_us;
        true
    }
}

impl fmt::Display for WaitNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WaitNode: seq={}, result={}, server=", self.range, self.result)?;
        match self.server() {
            Some(server) => write!(f, "{server}")?,
            None => f.write_str("sentinel")?,
        }
        write!(
            f,
            ", send_time={}, round_time={}, timeout={}",
            self.send_time_us,
            self.round_trip_us().unwrap_or(0),
            self.timeout_us
        )
    }
}
