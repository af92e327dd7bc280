use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Transport-owned per-response resources, released when the lease drops.
///
/// A completion handler never releases explicitly: dropping the
/// [`Completion`](crate::Completion) on any exit path releases the session.
#[derive(Default)]
pub struct SessionLease {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SessionLease {
    /// Lease with no transport resources attached.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Lease that runs `release` exactly once when dropped.
    pub fn on_release(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Lease accounted against a shared open-session counter.
    ///
    /// Increments `open` now and decrements it on release.
    pub fn counted(open: Arc<AtomicU64>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self::on_release(move || {
            open.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("attached", &self.release.is_some())
            .finish()
    }
}
