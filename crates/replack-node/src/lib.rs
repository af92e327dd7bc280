//! replack node-layer primitives.
//!
//! This crate wires together the sequenced wait queue, the acknowledgment
//! tracker that fans writes out to replicas, and the completion path that
//! turns out-of-order replica responses into an ordered watermark.

pub mod callback;
pub mod config;
pub mod error;
pub mod queue;
pub mod reaper;
pub mod stats;
pub mod tracker;
pub mod wait_node;

pub use callback::{AckCallback, AckEvent, ChannelCallback};
pub use config::TrackerConfig;
pub use error::{AckError, QueueError};
pub use queue::{Popped, SequencedQueue};
pub use reaper::Reaper;
pub use stats::{TrackerStats, TrackerStatsSnapshot};
pub use tracker::{AckTracker, PostParams};
pub use wait_node::{NodeResult, Target, WaitNode};
