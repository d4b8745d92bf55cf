//! Coalesced redraw requests
//!
//! The renderer draws only when asked. Requests can come from the camera
//! callback thread (new frame), the pipeline (placeholder uploaded) or the
//! renderer itself (backlog pipelining); any number of requests before the
//! next draw collapse into one.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// One coalescing redraw flag per stream.
pub struct RedrawSignal {
    pending: AtomicBool,
    notify: Notify,
}

impl RedrawSignal {
    pub fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Request a redraw. Callable from any thread; never blocks.
    pub fn request(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    /// Consume the pending request, if any.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Wait until a redraw has been requested, consuming the request.
    pub async fn requested(&self) {
        loop {
            if self.take() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

impl Default for RedrawSignal {
    fn default() -> Self {
        Self::new()
    }
}
