use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use replack_core::Clock;
use replack_transport::Transport;
use tracing::debug;

use crate::callback::AckCallback;
use crate::tracker::AckTracker;

/// Background thread that drains a tracker every `interval`, bounding how
/// long an expired head can sit undetected when no completions arrive.
///
/// Holds only a weak handle; exits once the tracker is dropped. Stopped and
/// joined on drop.
#[derive(Debug)]
pub struct Reaper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    pub fn spawn<T, C, K>(
        tracker: Weak<AckTracker<T, C, K>>,
        interval: Duration,
    ) -> io::Result<Self>
    where
        T: Transport + 'static,
        C: AckCallback + 'static,
        K: Clock + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("replack-reaper".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    thread::park_timeout(interval);
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    let Some(tracker) = tracker.upgrade() else {
                        debug!("tracker dropped, reaper exiting");
                        break;
                    };
                    tracker.drain();
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
