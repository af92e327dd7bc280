use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use replack_core::{CorrelationToken, ServerAddr};
use thiserror::Error;

use crate::session::SessionLease;

/// Reasons a dispatch could not be submitted to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport refused the request (disabled, oversize, unknown peer).
    #[error("dispatch rejected: {0}")]
    Rejected(&'static str),
    /// The worker side of the transport is gone.
    #[error("transport disconnected")]
    Disconnected,
}

/// One outbound request handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub server: ServerAddr,
    /// Protocol (packet) code of the request.
    pub pcode: i32,
    pub version: u16,
    pub timeout: Duration,
    pub payload: Bytes,
    /// Echoed back unchanged in the matching [`Completion`].
    pub token: CorrelationToken,
    /// Position of `server` in the caller's fan-out list.
    pub destination: usize,
}

/// Outcome of a dispatched request as reported by the transport.
///
/// `response == None` means the transport gave up waiting.
#[derive(Debug)]
pub struct Completion {
    pub token: CorrelationToken,
    pub response: Option<Bytes>,
    pub source: Option<ServerAddr>,
    pub session: SessionLease,
}

impl Completion {
    /// Completion carrying a response payload.
    pub fn response(token: CorrelationToken, payload: Bytes, source: ServerAddr) -> Self {
        Self {
            token,
            response: Some(payload),
            source: Some(source),
            session: SessionLease::detached(),
        }
    }

    /// Completion for a request the transport timed out on.
    pub fn timed_out(token: CorrelationToken) -> Self {
        Self {
            token,
            response: None,
            source: None,
            session: SessionLease::detached(),
        }
    }

    pub fn with_session(mut self, session: SessionLease) -> Self {
        self.session = session;
        self
    }
}

/// Receiver of transport completions.
pub trait CompletionHandler: Send + Sync {
    fn on_transport_complete(&self, completion: Completion);
}

/// Coarse transport health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHealthSnapshot {
    pub dispatched_ok: u64,
    pub dispatched_err: u64,
    pub open_sessions: u64,
    pub last_error: Option<String>,
}

/// Asynchronous request submission contract used by the tracker.
pub trait Transport: Send + Sync {
    /// Submits `request` without waiting for the response.
    ///
    /// `Ok` only means the request was accepted; the response (or nothing at
    /// all, if the connection dies before sending) arrives later through a
    /// [`CompletionHandler`].
    fn dispatch_async(&self, request: DispatchRequest) -> Result<(), TransportError>;

    /// Best-effort health counters.
    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot::default()
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn dispatch_async(&self, request: DispatchRequest) -> Result<(), TransportError> {
        (**self).dispatch_async(request)
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        (**self).health_snapshot()
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    dispatched: Vec<DispatchRequest>,
    reject_reason: Option<&'static str>,
    send_ok: u64,
    send_err: u64,
    last_error: Option<String>,
}

/// Recording transport for tests and simulations.
///
/// Accepted requests are captured; callers build completions for them with
/// [`InMemoryTransport::complete`] and feed those to a handler.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    state: Mutex<InMemoryState>,
    open_sessions: Arc<AtomicU64>,
}

impl InMemoryTransport {
    /// Makes every following dispatch fail with `reason` (`None` to accept).
    pub fn set_reject(&self, reason: Option<&'static str>) {
        self.lock().reject_reason = reason;
    }

    /// Drains and returns all requests captured so far.
    pub fn take_dispatched(&self) -> Vec<DispatchRequest> {
        std::mem::take(&mut self.lock().dispatched)
    }

    pub fn dispatched_len(&self) -> usize {
        self.lock().dispatched.len()
    }

    /// Builds a completion for `request` holding a counted session lease.
    pub fn complete(&self, request: &DispatchRequest, response: Option<Bytes>) -> Completion {
        Completion {
            token: request.token,
            response,
            source: Some(request.server),
            session: SessionLease::counted(Arc::clone(&self.open_sessions)),
        }
    }

    /// Sessions handed out through [`InMemoryTransport::complete`] and not yet released.
    pub fn open_sessions(&self) -> u64 {
        self.open_sessions.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for InMemoryTransport {
    fn dispatch_async(&self, request: DispatchRequest) -> Result<(), TransportError> {
        let mut state = self.lock();
        if let Some(reason) = state.reject_reason {
            state.send_err += 1;
            state.last_error = Some(reason.to_string());
            return Err(TransportError::Rejected(reason));
        }
        state.dispatched.push(request);
        state.send_ok += 1;
        Ok(())
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        let state = self.lock();
        TransportHealthSnapshot {
            dispatched_ok: state.send_ok,
            dispatched_err: state.send_err,
            open_sessions: self.open_sessions(),
            last_error: state.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Completion, DispatchRequest, InMemoryTransport, Transport, TransportError,
        TransportHealthSnapshot,
    };
    use bytes::Bytes;
    use replack_core::{CorrelationToken, ServerAddr};
    use std::sync::Arc;
    use std::time::Duration;

    fn request(slot: usize) -> DispatchRequest {
        DispatchRequest {
            server: "127.0.0.1:7001".parse::<ServerAddr>().expect("addr"),
            pcode: 42,
            version: 1,
            timeout: Duration::from_millis(50),
            payload: Bytes::from_static(b"write"),
            token: CorrelationToken {
                slot,
                generation: 0,
            },
            destination: 0,
        }
    }

    #[test]
    fn in_memory_transport_records_dispatches() {
        let transport = InMemoryTransport::default();
        transport
            .dispatch_async(request(0))
            .expect("dispatch should succeed");
        transport
            .dispatch_async(request(1))
            .expect("dispatch should succeed");
        assert_eq!(transport.dispatched_len(), 2);

        let taken = transport.take_dispatched();
        assert_eq!(taken[1].token.slot, 1);
        assert_eq!(transport.dispatched_len(), 0);
        assert_eq!(
            transport.health_snapshot(),
            TransportHealthSnapshot {
                dispatched_ok: 2,
                dispatched_err: 0,
                open_sessions: 0,
                last_error: None,
            }
        );
    }

    #[test]
    fn rejecting_transport_reports_error() {
        let transport = InMemoryTransport::default();
        transport.set_reject(Some("peer unreachable"));
        let err = transport
            .dispatch_async(request(0))
            .expect_err("rejected dispatch should fail");
        assert_eq!(err, TransportError::Rejected("peer unreachable"));
        assert_eq!(transport.dispatched_len(), 0);

        let health = transport.health_snapshot();
        assert_eq!(health.dispatched_err, 1);
        assert_eq!(health.last_error.as_deref(), Some("peer unreachable"));
    }

    #[test]
    fn completions_hold_sessions_until_dropped() {
        let transport = InMemoryTransport::default();
        let req = request(3);
        let completion = transport.complete(&req, Some(Bytes::from_static(b"ok")));
        assert_eq!(completion.token, req.token);
        assert_eq!(completion.source, Some(req.server));
        assert_eq!(transport.open_sessions(), 1);
        drop(completion);
        assert_eq!(transport.open_sessions(), 0);
    }

    #[test]
    fn shared_transport_dispatches_through_arc() {
        let transport = Arc::new(InMemoryTransport::default());
        let handle: Arc<InMemoryTransport> = Arc::clone(&transport);
        handle.dispatch_async(request(0)).expect("dispatch");
        assert_eq!(transport.dispatched_len(), 1);
    }

    #[test]
    fn timed_out_completion_has_no_payload() {
        let completion = Completion::timed_out(CorrelationToken {
            slot: 1,
            generation: 2,
        });
        assert!(completion.response.is_none());
        assert!(completion.source.is_none());
    }
}
