//! Owned event subscriptions.
//!
//! Subscribing returns a handle bundling the event receiver with a guard;
//! dropping the handle unsubscribes on every exit path, including early
//! returns out of error branches.

use std::task::{Context, Poll};

use tokio::sync::mpsc;

/// Calls its release hook exactly once when dropped.
pub struct SubscriptionGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Guard that releases nothing; for sources with no teardown.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard").finish()
    }
}

/// Receiver half of an event subscription; per-source ordering follows the
/// channel.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    _guard: SubscriptionGuard,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, guard: SubscriptionGuard) -> Self {
        Self { rx, _guard: guard }
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}
