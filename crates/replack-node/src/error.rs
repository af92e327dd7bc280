use replack_transport::TransportError;
use thiserror::Error;

/// Failures reported by [`SequencedQueue`](crate::queue::SequencedQueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The oldest slot has not been popped yet; drain before pushing again.
    #[error("wait queue capacity exceeded")]
    CapacityExceeded,
    #[error("wait queue is empty")]
    Empty,
    /// The head node is still pending and within its deadline.
    #[error("wait queue head is not ready")]
    NotReady,
    /// The node was already resolved, or its slot has moved on.
    #[error("wait node already done")]
    AlreadyDone,
}

/// Errors surfaced by the acknowledgment tracker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AckError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("wait queue: {0}")]
    Queue(#[from] QueueError),
    /// The transport refused a request; the node was resolved as failed.
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] TransportError),
}
