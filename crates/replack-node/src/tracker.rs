use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use replack_codec::result_code::decode_result_code;
use replack_core::time::duration_to_us;
use replack_core::{Clock, CorrelationToken, MonotonicClock, SeqRange, ServerAddr};
use replack_transport::{Completion, CompletionHandler, DispatchRequest, Transport};
use tracing::{debug, error, warn};

use crate::callback::AckCallback;
use crate::config::TrackerConfig;
use crate::error::{AckError, QueueError};
use crate::queue::{Popped, SequencedQueue};
use crate::stats::{TrackerStats, TrackerStatsSnapshot};
use crate::wait_node::{NodeResult, Target, WaitNode};

/// Per-request inputs shared by every node of one write.
#[derive(Debug, Clone)]
pub struct PostParams {
    pub range: SeqRange,
    pub send_time_us: u64,
    /// Protocol (packet) code forwarded to the transport.
    pub pcode: i32,
    pub timeout: Duration,
    pub payload: Bytes,
}

/// Fans writes out to replicas and folds their out-of-order completions into
/// an ordered acknowledgment watermark.
///
/// Every posted node is pushed into a [`SequencedQueue`]; the transport only
/// sees the node's [`CorrelationToken`]. Completions resolve nodes in any
/// order, while [`AckTracker::drain`] pops them strictly in posting order and
/// advances `next_acked_seq` past every resolved prefix.
///
/// The tracker implements [`CompletionHandler`]; whatever delivers transport
/// completions holds a direct handle to it.
pub struct AckTracker<T, C, K = MonotonicClock> {
    queue: SequencedQueue,
    transport: T,
    callback: C,
    clock: K,
    config: TrackerConfig,
    next_acked_seq: Mutex<u64>,
    published_seq: AtomicU64,
    stats: TrackerStats,
}

impl<T, C> AckTracker<T, C, MonotonicClock>
where
    T: Transport,
    C: AckCallback,
{
    pub fn new(config: TrackerConfig, transport: T, callback: C) -> Result<Self, AckError> {
        Self::with_clock(config, transport, callback, MonotonicClock::new())
    }
}

impl<T, C, K> AckTracker<T, C, K>
where
    T: Transport,
    C: AckCallback,
    K: Clock,
{
    pub fn with_clock(
        config: TrackerConfig,
        transport: T,
        callback: C,
        clock: K,
    ) -> Result<Self, AckError> {
        config.validate()?;
        let queue = SequencedQueue::with_capacity(config.queue_capacity)?;
        Ok(Self {
            queue,
            transport,
            callback,
            clock,
            config,
            next_acked_seq: Mutex::new(0),
            published_seq: AtomicU64::new(0),
            stats: TrackerStats::default(),
        })
    }

    /// Sends one write to every server in `servers`, then posts the write's
    /// sentinel covering `[end, end]`.
    ///
    /// Each node's timeout is `timeout - timeout_delta`. Stops at the first
    /// failing post; the sentinel is only posted when every replica post
    /// succeeded. With no servers the sentinel alone carries the write, and a
    /// drain runs immediately.
    pub fn many_post(
        &self,
        servers: &[ServerAddr],
        range: SeqRange,
        pcode: i32,
        timeout: Duration,
        payload: Bytes,
    ) -> Result<(), AckError> {
        let timeout = self.config.effective_timeout(timeout)?;
        let params = PostParams {
            range,
            send_time_us: self.clock.now_us(),
            pcode,
            timeout,
            payload,
        };
        for (index, server) in servers.iter().enumerate() {
            if let Err(err) = self.post(
                Target::Replica {
                    server: *server,
                    index,
                },
                &params,
            ) {
                error!(%server, seq = %range, %err, "post to replica failed");
                return Err(err);
            }
        }
        let sentinel = PostParams {
            range: range.tail(),
            ..params
        };
        if let Err(err) = self.post(Target::Sentinel, &sentinel) {
            error!(seq = %range, %err, "post of sentinel failed");
            return Err(err);
        }
        if servers.is_empty() {
            self.drain();
        }
        Ok(())
    }

    /// Enqueues one node and dispatches it to its replica.
    ///
    /// A full queue is drained and the push retried until room appears; this
    /// spins rather than sleeps, relying on the head eventually resolving or
    /// expiring. A sentinel resolves as soon as it is queued. A replica whose
    /// dispatch is refused resolves as `DispatchFailed` and the refusal is
    /// returned.
    pub fn post(&self, target: Target, params: &PostParams) -> Result<CorrelationToken, AckError> {
        if params.timeout.is_zero() {
            return Err(AckError::InvalidArgument("timeout must be > 0"));
        }
        let node = WaitNode::new(
            params.range,
            target,
            params.send_time_us,
            duration_to_us(params.timeout),
        );
        let token = loop {
            match self.queue.push(node.clone()) {
                Ok(token) => break token,
                Err(QueueError::CapacityExceeded) => {
                    self.drain();
                    thread::yield_now();
                }
                Err(err) => {
                    error!(%err, "wait queue push failed");
                    return Err(err.into());
                }
            }
        };
        self.stats.record_posted();

        let Target::Replica { server, index } = target else {
            self.resolve(token, NodeResult::Success);
            return Ok(token);
        };
        let request = DispatchRequest {
            server,
            pcode: params.pcode,
            version: self.config.protocol_version,
            timeout: params.timeout,
            payload: params.payload.clone(),
            token,
            destination: index,
        };
        match self.transport.dispatch_async(request) {
            Ok(()) => {
                self.stats.record_dispatched();
                Ok(token)
            }
            Err(err) => {
                error!(%server, %token, %err, "dispatch failed");
                self.stats.record_dispatch_failed();
                self.resolve(token, NodeResult::DispatchFailed);
                Err(err.into())
            }
        }
    }

    /// Pops every resolved (or expired) node at the head of the queue and
    /// advances the acknowledged watermark past them.
    ///
    /// Serialized: concurrent callers wait for the running drain. Expired
    /// heads fire `on_node_resolved`; `on_sequence_advanced` fires at most
    /// once, after the loop, if the watermark moved. Returns the watermark.
    pub fn drain(&self) -> u64 {
        let mut acked = self
            .next_acked_seq
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let old = *acked;
        let mut last = None;
        loop {
            let node = match self.queue.pop(self.clock.now_us()) {
                Ok(Popped::Resolved(_, node)) => node,
                Ok(Popped::Expired(token, node)) => {
                    warn!(%token, %node, "wait node timed out");
                    self.stats.record_resolved(node.result);
                    self.callback.on_node_resolved(&node);
                    node
                }
                Err(QueueError::Empty | QueueError::NotReady) => break,
                Err(err) => {
                    error!(%err, "wait queue pop failed");
                    break;
                }
            };
            *acked = (*acked).max(node.range.start());
            last = Some(node);
        }
        if let Some(node) = last.filter(|_| *acked != old) {
            self.published_seq.store(*acked, Ordering::Release);
            self.stats.record_advance();
            debug!(acked_seq = *acked, from = old, "acknowledged sequence advanced");
            self.callback.on_sequence_advanced(*acked, &node);
        }
        *acked
    }

    /// Last watermark published by a drain, without draining.
    pub fn acked_seq(&self) -> u64 {
        self.published_seq.load(Ordering::Acquire)
    }

    /// Nodes posted and not yet drained.
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> TrackerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn callback(&self) -> &C {
        &self.callback
    }

    /// Marks `token` resolved and notifies the callback on the first mark.
    ///
    /// Returns whether this call performed the transition.
    fn resolve(&self, token: CorrelationToken, result: NodeResult) -> bool {
        match self.queue.done(token, result, self.clock.now_us()) {
            Ok(node) => {
                if !result.is_success() {
                    warn!(%token, %node, "wait node failed");
                }
                self.stats.record_resolved(result);
                self.callback.on_node_resolved(&node);
                true
            }
            Err(QueueError::AlreadyDone) => {
                debug!(%token, %result, "completion for already resolved node");
                self.stats.record_duplicate();
                false
            }
            Err(err) => {
                error!(%token, %err, "wait queue done failed");
                false
            }
        }
    }
}

impl<T, C, K> CompletionHandler for AckTracker<T, C, K>
where
    T: Transport,
    C: AckCallback,
    K: Clock,
{
    fn on_transport_complete(&self, completion: Completion) {
        // the session lease is released when `_session` drops on return
        let Completion {
            token,
            response,
            source,
            session: _session,
        } = completion;
        let result = match response {
            None => {
                warn!(%token, "response timed out");
                NodeResult::ResponseTimedOut
            }
            Some(payload) => {
                let mut pos = 0;
                match decode_result_code(&payload, &mut pos) {
                    Ok(code) => NodeResult::from_code(code.code),
                    Err(err) => {
                        error!(%token, ?source, pos, %err, "deserialize result code failed");
                        NodeResult::Deserialize
                    }
                }
            }
        };
        if self.resolve(token, result) {
            self.drain();
        }
    }
}
