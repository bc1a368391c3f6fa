//! Keyed fan-out of provider events to owned subscriptions.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use basket_trade_core::subscription::{Subscription, SubscriptionGuard};

/// Per-key subscriber lists. Dropping a returned subscription removes its
/// sender, so abandoned listeners never accumulate.
pub(crate) struct Dispatch<K, T> {
    subs: Mutex<HashMap<K, Vec<(u64, mpsc::UnboundedSender<T>)>>>,
    next_token: AtomicU64,
}

impl<K, T> Dispatch<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Send + Clone + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subs: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Vec<(u64, mpsc::UnboundedSender<T>)>>> {
        self.subs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(self: &Arc<Self>, key: K) -> Subscription<T> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().entry(key.clone()).or_default().push((token, tx));

        let dispatch = Arc::clone(self);
        let guard = SubscriptionGuard::new(move || {
            let mut subs = dispatch.lock();
            if let Some(list) = subs.get_mut(&key) {
                list.retain(|(t, _)| *t != token);
                if list.is_empty() {
                    subs.remove(&key);
                }
            }
        });
        Subscription::new(rx, guard)
    }

    /// Deliver to every live subscriber of `key`, in subscription order.
    pub fn publish(&self, key: &K, value: T) {
        if let Some(list) = self.lock().get(key) {
            for (_, tx) in list {
                let _ = tx.send(value.clone());
            }
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, key: &K) -> usize {
        self.lock().get(key).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_only_matching_key() {
        let dispatch: Arc<Dispatch<String, u32>> = Dispatch::new();
        let mut a = dispatch.subscribe("a".to_string());
        let mut b = dispatch.subscribe("b".to_string());

        dispatch.publish(&"a".to_string(), 1);
        assert_eq!(a.recv().await, Some(1));
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let dispatch: Arc<Dispatch<String, u32>> = Dispatch::new();
        let sub = dispatch.subscribe("a".to_string());
        assert_eq!(dispatch.subscriber_count(&"a".to_string()), 1);
        drop(sub);
        assert_eq!(dispatch.subscriber_count(&"a".to_string()), 0);
    }
}
