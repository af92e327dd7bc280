use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Inclusive sequence range `[start, end]` identifying one logical write.
///
/// Construction through [`SeqRange::new`] guarantees `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeqRange {
    start: u64,
    end: u64,
}

impl SeqRange {
    /// Builds a range, rejecting `end < start`.
    pub fn new(start: u64, end: u64) -> Result<Self, CoreError> {
        if end < start {
            return Err(CoreError::InvalidArgument("sequence range end < start"));
        }
        Ok(Self { start, end })
    }

    /// Single-sequence range `[seq, seq]`.
    pub fn single(seq: u64) -> Self {
        Self {
            start: seq,
            end: seq,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Range covering only this range's last sequence.
    pub fn tail(&self) -> Self {
        Self::single(self.end)
    }
}

impl fmt::Display for SeqRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.start, self.end)
    }
}

/// Replica server identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddr(pub SocketAddr);

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ServerAddr {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<SocketAddr>()
            .map(ServerAddr)
            .map_err(|_| CoreError::Parse("server address must be ip:port"))
    }
}

impl From<SocketAddr> for ServerAddr {
    fn from(addr: SocketAddr) -> Self {
        ServerAddr(addr)
    }
}

/// Opaque handle given to the transport and echoed back on completion.
///
/// `slot` addresses a ring-buffer slot; `generation` counts how many times
/// the ring has wrapped onto it, so a late completion for a recycled slot
/// never matches the node now occupying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationToken {
    pub slot: usize,
    pub generation: u64,
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.slot, self.generation)
    }
}
