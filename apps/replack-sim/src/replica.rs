use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use replack_codec::result_code::{encode_result_code, ResultCode};
use replack_transport::{Completion, CompletionHandler, DispatchReceiver, DispatchRequest};
use serde::Serialize;
use tracing::{debug, trace, warn};

/// Code replicas answer with when they refuse a write.
pub const REPLICA_REFUSED: i32 = -3998;

const IDLE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct ReplicaBehavior {
    pub max_reply_delay: Duration,
    pub drop_probability: f64,
    pub error_probability: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The request is lost; the tracker only learns through its deadline.
    Drop,
    After { delay: Duration, code: ResultCode },
}

pub fn decide<R: Rng>(rng: &mut R, behavior: &ReplicaBehavior) -> Reply {
    if behavior.drop_probability > 0.0 && rng.gen_bool(behavior.drop_probability) {
        return Reply::Drop;
    }
    let max_us = behavior.max_reply_delay.as_micros() as u64;
    let delay = if max_us == 0 {
        Duration::ZERO
    } else {
        Duration::from_micros(rng.gen_range(0..=max_us))
    };
    let code = if behavior.error_probability > 0.0 && rng.gen_bool(behavior.error_probability) {
        ResultCode::error(REPLICA_REFUSED, "replica refused write")
    } else {
        ResultCode::success()
    };
    Reply::After { delay, code }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicaReport {
    pub received: u64,
    pub answered: u64,
    pub refused: u64,
    pub dropped: u64,
    /// Replies still scheduled when the dispatch channel closed.
    pub abandoned: u64,
}

struct Scheduled {
    due: Instant,
    request: DispatchRequest,
    code: ResultCode,
}

/// Plays every replica in one thread: requests arrive on `rx`, replies are
/// delivered to `handler` once their delay elapses, in due order rather than
/// dispatch order.
///
/// The thread ends when the dispatch channel closes or the handler is gone.
pub fn spawn<H>(
    rx: DispatchReceiver,
    handler: Weak<H>,
    behavior: ReplicaBehavior,
) -> io::Result<JoinHandle<ReplicaReport>>
where
    H: CompletionHandler + 'static,
{
    thread::Builder::new()
        .name("replack-replicas".into())
        .spawn(move || run(rx, handler, behavior))
}

fn run<H: CompletionHandler>(
    rx: DispatchReceiver,
    handler: Weak<H>,
    behavior: ReplicaBehavior,
) -> ReplicaReport {
    let mut rng = StdRng::seed_from_u64(behavior.seed);
    let mut report = ReplicaReport::default();
    let mut scheduled: Vec<Scheduled> = Vec::new();

    loop {
        let now = Instant::now();
        let wait = scheduled
            .iter()
            .map(|s| s.due.saturating_duration_since(now))
            .min()
            .unwrap_or(IDLE_POLL)
            .min(IDLE_POLL);

        let first = match rx.recv_timeout(wait) {
            Ok(first) => first,
            Err(_) => {
                report.abandoned = scheduled.len() as u64;
                debug!(abandoned = report.abandoned, "dispatch channel closed");
                return report;
            }
        };
        for request in first.into_iter().chain(rx.drain_ready()) {
            report.received += 1;
            match decide(&mut rng, &behavior) {
                Reply::Drop => {
                    trace!(token = %request.token, server = %request.server, "dropping request");
                    report.dropped += 1;
                }
                Reply::After { delay, code } => scheduled.push(Scheduled {
                    due: Instant::now() + delay,
                    request,
                    code,
                }),
            }
        }

        let now = Instant::now();
        let (due, later): (Vec<_>, Vec<_>) = scheduled.into_iter().partition(|s| s.due <= now);
        scheduled = later;
        if due.is_empty() {
            continue;
        }
        let Some(handler) = handler.upgrade() else {
            report.abandoned = (due.len() + scheduled.len()) as u64;
            debug!("completion handler dropped, replicas exiting");
            return report;
        };
        for reply in due {
            let payload = match encode_result_code(&reply.code) {
                Ok(buf) => Bytes::from(buf),
                Err(err) => {
                    warn!(token = %reply.request.token, %err, "failed to encode reply");
                    continue;
                }
            };
            if reply.code.is_success() {
                report.answered += 1;
            } else {
                report.refused += 1;
            }
            handler.on_transport_complete(Completion::response(
                reply.request.token,
                payload,
                reply.request.server,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{decide, spawn, ReplicaBehavior, Reply, REPLICA_REFUSED};
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use replack_codec::result_code::decode_result_code;
    use replack_core::CorrelationToken;
    use replack_transport::{
        channel_transport, Completion, CompletionHandler, DispatchRequest, Transport,
    };
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn behavior(drop: f64, error: f64) -> ReplicaBehavior {
        ReplicaBehavior {
            max_reply_delay: Duration::from_millis(2),
            drop_probability: drop,
            error_probability: error,
            seed: 7,
        }
    }

    #[test]
    fn certain_drop_never_replies() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..32 {
            assert_eq!(decide(&mut rng, &behavior(1.0, 0.0)), Reply::Drop);
        }
    }

    #[test]
    fn replies_stay_within_delay_bound() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..32 {
            match decide(&mut rng, &behavior(0.0, 1.0)) {
                Reply::After { delay, code } => {
                    assert!(delay <= Duration::from_millis(2));
                    assert_eq!(code.code, REPLICA_REFUSED);
                }
                Reply::Drop => panic!("drop probability is zero"),
            }
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<Completion>>);

    impl CompletionHandler for Collect {
        fn on_transport_complete(&self, completion: Completion) {
            self.0.lock().expect("collect lock").push(completion);
        }
    }

    #[test]
    fn worker_answers_every_request_then_exits() {
        let (transport, rx) = channel_transport(16);
        let handler = Arc::new(Collect::default());
        let worker =
            spawn(rx, Arc::downgrade(&handler), behavior(0.0, 0.0)).expect("spawn replicas");

        for slot in 0..4 {
            transport
                .dispatch_async(DispatchRequest {
                    server: "10.0.0.1:9000".parse().expect("addr"),
                    pcode: 1,
                    version: 1,
                    timeout: Duration::from_secs(1),
                    payload: Bytes::from_static(b"w"),
                    token: CorrelationToken {
                        slot,
                        generation: 0,
                    },
                    destination: 0,
                })
                .expect("dispatch");
        }
        drop(transport);
        // closing the channel abandons whatever is still scheduled
        let report = worker.join().expect("replica thread");
        assert_eq!(report.received, 4);
        assert_eq!(report.answered + report.abandoned, 4);

        for completion in handler.0.lock().expect("collect lock").iter() {
            let payload = completion.response.as_ref().expect("replied");
            let mut pos = 0;
            let code = decode_result_code(payload, &mut pos).expect("decode reply");
            assert!(code.is_success());
        }
    }
}
