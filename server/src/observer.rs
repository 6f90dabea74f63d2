//! Local change observers.
//!
//! Listeners are plain callbacks run on the task that changed the store.
//! Delivery snapshots the listener list first, so a callback may watch or
//! unwatch (on this or any store) without deadlocking. A listener removed
//! during delivery still sees that event; one added during delivery sees the
//! next one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by `watch`, used to unwatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registry of synchronous listeners for events of type `T`.
pub struct Observers<T> {
    listeners: Mutex<Vec<(WatchId, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T> Observers<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener.
    pub fn watch(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> WatchId {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unwatch(&self, id: WatchId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        before != listeners.len()
    }

    /// Deliver `event` to every listener registered right now.
    pub fn notify(&self, event: &T) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notify_reaches_every_listener() {
        let observers = Observers::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = Arc::clone(&total);
            observers.watch(move |n| {
                total.fetch_add(*n as usize, Ordering::SeqCst);
            });
        }
        observers.notify(&2);

        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn unwatch_is_idempotent() {
        let observers = Observers::<()>::new();
        let id = observers.watch(|_| {});

        assert!(observers.unwatch(id));
        assert!(!observers.unwatch(id));
        assert!(observers.is_empty());
    }

    #[test]
    fn listener_can_unwatch_itself() {
        let observers = Arc::new(Observers::<()>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(Mutex::new(None::<WatchId>));

        let id = {
            let observers = Arc::clone(&observers);
            let calls = Arc::clone(&calls);
            let slot = Arc::clone(&slot);
            observers.clone().watch(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *slot.lock() {
                    observers.unwatch(id);
                }
            })
        };
        *slot.lock() = Some(id);

        observers.notify(&());
        observers.notify(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(observers.is_empty());
    }
}
