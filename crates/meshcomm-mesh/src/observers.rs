//! Registry of callbacks interested in newly accepted messages.
//!
//! Registration and removal take the write lock. `notify` copies the current
//! list under the read lock and calls the observers after releasing it, so an
//! observer may register or remove observers without deadlocking; such changes
//! apply from the next message on.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use meshcomm_core::Message;
use parking_lot::RwLock;
use tracing::warn;

/// Callback invoked once per accepted message.
pub type Observer = Arc<dyn Fn(&Message) + Send + Sync>;

/// Handle returned by [`ObserverRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Observer)>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Call every observer in registration order.
    ///
    /// A panicking observer is logged and skipped; the remaining observers
    /// still run. Returns the number of observers that panicked.
    pub fn notify(&self, message: &Message) -> usize {
        let observers: Vec<(ObserverId, Observer)> = self.observers.read().clone();
        let mut panicked = 0;
        for (id, observer) in observers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(message))) {
                panicked += 1;
                warn!(
                    observer = id.0,
                    message_id = %message.id,
                    panic = %panic_text(payload.as_ref()),
                    "message observer panicked"
                );
            }
        }
        panicked
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcomm_core::{Category, User};
    use parking_lot::Mutex;

    fn msg(content: &str) -> Message {
        Message::new(content, Category::General, User::new("tester", "node-t"))
    }

    #[test]
    fn test_notify_in_registration_order() {
        let registry = ObserverRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            registry.register(move |m: &Message| seen.lock().push(format!("{tag}:{}", m.content)));
        }
        assert_eq!(registry.notify(&msg("x")), 0);
        assert_eq!(*seen.lock(), ["first:x", "second:x", "third:x"]);
    }

    #[test]
    fn test_unregister() {
        let registry = ObserverRegistry::new();
        let count = Arc::new(AtomicU64::new(0));
        let id = {
            let count = Arc::clone(&count);
            registry.register(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        registry.notify(&msg("a"));
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.notify(&msg("b"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_observer_does_not_stop_others() {
        let registry = ObserverRegistry::new();
        let reached = Arc::new(AtomicU64::new(0));
        registry.register(|_| panic!("observer bug"));
        {
            let reached = Arc::clone(&reached);
            registry.register(move |_| {
                reached.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(registry.notify(&msg("a")), 1);
        assert_eq!(registry.notify(&msg("b")), 1);
        assert_eq!(reached.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_observer_may_register_during_notify() {
        let registry = Arc::new(ObserverRegistry::new());
        {
            let inner = Arc::clone(&registry);
            registry.register(move |_| {
                inner.register(|_| {});
            });
        }
        registry.notify(&msg("a"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = ObserverRegistry::new();
        let a = registry.register(|_| {});
        let b = registry.register(|_| {});
        assert_ne!(a, b);
    }
}
