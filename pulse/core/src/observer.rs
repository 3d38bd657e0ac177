//! Listener Registry
//!
//! Fan-out of facade notifications to registered callbacks. Each topic is a
//! [`ListenerSet`]; registering returns a [`Subscription`] that removes the
//! listener again. A panicking listener is logged and skipped, the rest are
//! still notified.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Something a [`Subscription`] can detach from
trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

/// Listeners for one notification topic
pub(crate) struct ListenerSet<T> {
    topic: &'static str,
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Listener<T>)>>,
}

impl<T: 'static> ListenerSet<T> {
    pub fn new(topic: &'static str) -> Arc<Self> {
        Arc::new(Self {
            topic,
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Register a listener; notified in registration order
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        tracing::debug!(topic = self.topic, id, "Listener registered");

        let weak: Weak<Self> = Arc::downgrade(self);
        let detach: Weak<dyn Detach> = weak;
        Subscription {
            id,
            topic: self.topic,
            set: detach,
        }
    }

    /// Call every listener with `value`; returns how many panicked
    ///
    /// The list is copied out first so listeners may (un)subscribe.
    pub fn notify(&self, value: &T) -> usize {
        let listeners: Vec<(u64, Listener<T>)> = self.listeners.read().clone();
        let mut failures = 0;
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
                failures += 1;
                tracing::warn!(topic = self.topic, id, "Listener panicked");
            }
        }
        failures
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl<T: 'static> Detach for ListenerSet<T> {
    fn detach(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }
}

/// Handle returned by the `on_*` registration methods
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    topic: &'static str,
    set: Weak<dyn Detach>,
}

impl Subscription {
    /// Topic this subscription belongs to (`"data"`, `"status"`, ...)
    #[must_use]
    pub fn topic(&self) -> &'static str {
        self.topic
    }

    /// Remove the listener; false if it was already gone
    pub fn unsubscribe(self) -> bool {
        let removed = self.set.upgrade().is_some_and(|set| set.detach(self.id));
        if removed {
            tracing::debug!(topic = self.topic, id = self.id, "Listener removed");
        }
        removed
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_in_registration_order() {
        let set = ListenerSet::<u32>::new("test");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let a = seen.clone();
        let _s1 = set.subscribe(move |v| a.lock().push(("a", *v)));
        let b = seen.clone();
        let _s2 = set.subscribe(move |v| b.lock().push(("b", *v)));

        set.notify(&7);
        assert_eq!(*seen.lock(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let set = ListenerSet::<u32>::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = set.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        set.notify(&1);
        assert!(sub.unsubscribe());
        set.notify(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let set = ListenerSet::<u32>::new("test");
        let count = Arc::new(AtomicUsize::new(0));

        let _bad = set.subscribe(|_| panic!("listener bug"));
        let c = count.clone();
        let _good = set.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(set.notify(&1), 1);
        assert_eq!(set.notify(&2), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_after_set_dropped() {
        let set = ListenerSet::<u32>::new("test");
        let sub = set.subscribe(|_| {});
        drop(set);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_listener_may_subscribe_during_notify() {
        let set = ListenerSet::<u32>::new("test");
        let inner = set.clone();
        let _s = set.subscribe(move |_| {
            let _ = inner.subscribe(|_| {});
        });

        set.notify(&1);
        assert_eq!(set.len(), 2);
    }
}
