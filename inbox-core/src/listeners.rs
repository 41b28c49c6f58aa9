//! Synchronous observer registry.
//!
//! Listeners are invoked in registration order on the thread that emits.
//! The registry lock is released before any callback runs, so a callback
//! may subscribe or dispose without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback<E>)>>,
}

/// A list of callbacks receiving `&E`.
pub struct Listeners<E> {
    registry: Arc<Registry<E>>,
}

impl<E> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.registry.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener registered at the time of the call.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .registry
            .entries
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl<E: 'static> Listeners<E> {
    /// Register `callback`. The listener stays registered until the returned
    /// handle is disposed; dropping the handle does not unsubscribe.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.entries.lock().push((id, Arc::new(callback)));

        let registry: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription {
            dispose: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.entries.lock().retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }
}

/// Disposer handle returned by [`Listeners::subscribe`].
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the listener. Safe to call after the registry is gone.
    pub fn dispose(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_in_registration_order() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = seen.clone();
        let _first = listeners.subscribe(move |n| a.lock().push(("first", *n)));
        let b = seen.clone();
        let _second = listeners.subscribe(move |n| b.lock().push(("second", *n)));

        listeners.emit(&7);
        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_dispose_removes_listener() {
        let listeners: Listeners<()> = Listeners::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        let sub = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        listeners.emit(&());
        sub.dispose();
        listeners.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_dispose_after_registry_dropped() {
        let listeners: Listeners<()> = Listeners::new();
        let sub = listeners.subscribe(|_| {});
        drop(listeners);
        sub.dispose();
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let listeners: Listeners<()> = Listeners::new();
        let inner = listeners.clone();
        let _sub = listeners.subscribe(move |_| {
            let _nested = inner.subscribe(|_| {});
        });

        listeners.emit(&());
        assert_eq!(listeners.len(), 2);
    }
}
