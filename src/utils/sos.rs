//! Signal-of-Stop: cooperative cancellation shared by the dispatcher, the
//! file senders and the terminal front end.
//!
//! One root signal is created in `main` and cancelled on Ctrl-C or `/quit`.
//! Outgoing transfers get their own signal so a single send can be stopped
//! without touching the rest of the node.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Clones share state; cancelling any clone wakes every waiter.
#[derive(Debug, Default, Clone)]
pub struct SignalOfStop {
    internal: Arc<SharedState>,
}

#[derive(Debug, Default)]
struct SharedState {
    closing: AtomicBool,
    notify: Notify,
}

impl SignalOfStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.internal.closing.store(true, Ordering::Release);
        self.internal.notify.notify_waiters();
    }

    pub fn cancelled(&self) -> bool {
        self.internal.closing.load(Ordering::Acquire)
    }

    /// Resolves once cancelled. Returns immediately if already cancelled.
    pub async fn wait(&self) {
        let notified = self.internal.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not lost.
        notified.as_mut().enable();
        if self.cancelled() {
            return;
        }
        notified.await;
    }
}
