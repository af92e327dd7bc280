use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use tracing::warn;

use crate::adapter::{DispatchRequest, Transport, TransportError, TransportHealthSnapshot};

/// Transport that hands dispatches to worker threads over a bounded channel.
///
/// Submission never blocks: a full channel rejects the request, which the
/// tracker records as a dispatch failure.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: SyncSender<DispatchRequest>,
    sent: AtomicU64,
    failed: AtomicU64,
}

/// Worker side of a [`ChannelTransport`].
#[derive(Debug)]
pub struct DispatchReceiver {
    rx: Receiver<DispatchRequest>,
}

/// Creates a connected transport/receiver pair buffering up to `bound` requests.
pub fn channel_transport(bound: usize) -> (ChannelTransport, DispatchReceiver) {
    let (tx, rx) = mpsc::sync_channel(bound);
    (
        ChannelTransport {
            tx,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        },
        DispatchReceiver { rx },
    )
}

impl Transport for ChannelTransport {
    fn dispatch_async(&self, request: DispatchRequest) -> Result<(), TransportError> {
        match self.tx.try_send(request) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(request)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(server = %request.server, token = %request.token, "dispatch channel full");
                Err(TransportError::Rejected("dispatch channel full"))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Disconnected)
            }
        }
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot {
            dispatched_ok: self.sent.load(Ordering::Relaxed),
            dispatched_err: self.failed.load(Ordering::Relaxed),
            ..TransportHealthSnapshot::default()
        }
    }
}

impl DispatchReceiver {
    /// Waits up to `timeout` for the next request.
    ///
    /// Returns `Ok(None)` on timeout and `Err` once every sender is gone.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<DispatchRequest>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(request) => Ok(Some(request)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    /// Returns every request already queued without waiting.
    pub fn drain_ready(&self) -> Vec<DispatchRequest> {
        self.rx.try_iter().collect()
    }
}
