//! Signal-of-Stop: cooperative cancellation primitive.
//!
//! Send loops poll [`SignalOfStop::cancelled`] once per chunk; the binary
//! awaits [`SignalOfStop::wait`] to shut down on Ctrl+C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A cooperative cancellation token.
///
/// Clones share the same underlying state, so cancelling any clone
/// notifies all waiters.
#[derive(Debug, Default)]
pub struct SignalOfStop {
    internal: Arc<SharedState>,
}

#[derive(Debug, Default)]
struct SharedState {
    closing: AtomicBool,
    notify: Notify,
}

impl SignalOfStop {
    /// Create a new, uncancelled signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to all waiters.
    pub fn cancel(&self) {
        self.internal.closing.store(true, Ordering::Release);
        self.internal.notify.notify_waiters();
    }

    pub fn cancelled(&self) -> bool {
        self.internal.closing.load(Ordering::Acquire)
    }

    /// Wait for cancellation. Returns immediately if already cancelled.
    pub async fn wait(&self) {
        loop {
            let notified = self.internal.notify.notified();
            if self.cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Clone for SignalOfStop {
    fn clone(&self) -> Self {
        Self {
            internal: Arc::clone(&self.internal),
        }
    }
}
