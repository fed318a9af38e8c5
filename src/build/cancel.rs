//! Cancellation Token
//!
//! Per-step cancellation with two states: idle and signalled, where
//! signalled is terminal. File tasks poll at every suspension point;
//! the async `cancelled()` future lets the subprocess wrapper race a
//! running child against cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cloneable cancellation handle shared by all tasks of a step.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    signalled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to the signalled state and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        self.inner.signalled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.signalled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is signalled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering so a signal between the first
            // check and the registration is not lost.
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
