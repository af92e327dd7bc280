use std::time::Duration;

use crate::error::AckError;

/// Protocol version stamped on dispatched requests by default.
pub const DEFAULT_PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Wait queue slots; bounds the number of in-flight nodes.
    pub queue_capacity: usize,
    /// Slack subtracted from a write's timeout before it is handed to the
    /// transport, so the tracker gives up slightly before the transport does.
    pub timeout_delta: Duration,
    /// Protocol version stamped on every dispatch.
    pub protocol_version: u16,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            timeout_delta: Duration::from_millis(10),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), AckError> {
        if self.queue_capacity == 0 {
            return Err(AckError::InvalidArgument("queue_capacity must be > 0"));
        }
        Ok(())
    }

    /// Per-node timeout for a write issued with `timeout`.
    ///
    /// Rejects timeouts that do not exceed `timeout_delta`.
    pub fn effective_timeout(&self, timeout: Duration) -> Result<Duration, AckError> {
        if timeout <= self.timeout_delta {
            return Err(AckError::InvalidArgument("timeout must exceed timeout_delta"));
        }
        Ok(timeout - self.timeout_delta)
    }
}
