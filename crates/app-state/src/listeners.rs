//! Listener registry shared by the observable state holders
//!
//! Holds the latest published value and a set of callbacks. Every delivery
//! happens under one re-entrant lock, which gives three guarantees:
//!
//! - listeners see values in publish order;
//! - a newly registered listener gets the current value exactly once and then
//!   every later publish, with nothing missed or duplicated in between;
//! - once `remove` or `close` returns, the affected listeners are never called
//!   again. Called from another thread it waits for an in-flight delivery;
//!   called from inside a listener it takes effect for the rest of that
//!   delivery.

use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Shared callback
pub(crate) type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registry-local listener id
pub(crate) type ListenerId = u64;

struct Slots<T> {
    current: T,
    listeners: Vec<(ListenerId, Listener<T>)>,
    next_id: ListenerId,
    closed: bool,
}

impl<T> Slots<T> {
    fn is_live(&self, id: ListenerId) -> bool {
        !self.closed && self.listeners.iter().any(|(l, _)| *l == id)
    }
}

pub(crate) struct ListenerRegistry<T> {
    slots: ReentrantMutex<RefCell<Slots<T>>>,
}

impl<T: Clone + Send> ListenerRegistry<T> {
    pub(crate) fn new(initial: T) -> Self {
        Self {
            slots: ReentrantMutex::new(RefCell::new(Slots {
                current: initial,
                listeners: Vec::new(),
                next_id: 0,
                closed: false,
            })),
        }
    }

    /// Latest published value
    pub(crate) fn current(&self) -> T {
        self.slots.lock().borrow().current.clone()
    }

    /// Number of registered listeners
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().borrow().listeners.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.slots.lock().borrow().closed
    }

    /// Register `listener` and deliver the current value to it
    ///
    /// Returns `None` once the registry is closed.
    pub(crate) fn register(&self, listener: Listener<T>) -> Option<ListenerId> {
        let guard = self.slots.lock();
        let (id, value) = {
            let mut slots = guard.borrow_mut();
            if slots.closed {
                return None;
            }
            slots.next_id += 1;
            let id = slots.next_id;
            slots.listeners.push((id, Arc::clone(&listener)));
            (id, slots.current.clone())
        };

        invoke(&listener, &value);
        Some(id)
    }

    /// Remove a listener, returning how many remain
    pub(crate) fn remove(&self, id: ListenerId) -> usize {
        let guard = self.slots.lock();
        let mut slots = guard.borrow_mut();
        slots.listeners.retain(|(l, _)| *l != id);
        slots.listeners.len()
    }

    /// Store `value` and deliver it to every live listener
    pub(crate) fn publish(&self, value: T) {
        let guard = self.slots.lock();
        let listeners = {
            let mut slots = guard.borrow_mut();
            if slots.closed {
                return;
            }
            slots.current = value.clone();
            slots.listeners.clone()
        };

        for (id, listener) in listeners {
            // A listener may have removed itself or a peer, or closed us
            if !guard.borrow().is_live(id) {
                continue;
            }
            invoke(&listener, &value);
        }
    }

    /// Stop all delivery and drop the listeners
    ///
    /// Returns `false` if the registry was already closed.
    pub(crate) fn close(&self) -> bool {
        let guard = self.slots.lock();
        let mut slots = guard.borrow_mut();
        if slots.closed {
            return false;
        }
        slots.closed = true;
        slots.listeners.clear();
        true
    }

    /// Run `f` while holding the delivery lock
    pub(crate) fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.slots.lock();
        f()
    }
}

impl<T: Clone + Send + PartialEq> ListenerRegistry<T> {
    /// Publish only when `value` differs from the current one
    ///
    /// Returns whether the value was stored; always `false` once closed.
    pub(crate) fn publish_if_changed(&self, value: T) -> bool {
        let guard = self.slots.lock();
        {
            let slots = guard.borrow();
            if slots.closed || slots.current == value {
                return false;
            }
        }
        self.publish(value);
        true
    }
}

fn invoke<T>(listener: &Listener<T>, value: &T) {
    if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
        tracing::error!("listener panicked; delivery continues");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, Listener<T>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Arc::new(move |v: &T| sink.lock().push(v.clone())))
    }

    #[test]
    fn test_register_delivers_current_then_updates() {
        let registry = ListenerRegistry::new(0u32);
        registry.publish(1);

        let (seen, listener) = recorder();
        registry.register(listener).unwrap();
        registry.publish(2);
        registry.publish(2);

        assert_eq!(*seen.lock(), vec![1, 2, 2]);
        assert_eq!(registry.current(), 2);
    }

    #[test]
    fn test_publish_if_changed_skips_duplicates() {
        let registry = ListenerRegistry::new("a".to_string());
        let (seen, listener) = recorder();
        registry.register(listener).unwrap();

        assert!(!registry.publish_if_changed("a".to_string()));
        assert!(registry.publish_if_changed("b".to_string()));

        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_publish_if_changed_after_close() {
        let registry = ListenerRegistry::new(1u32);
        registry.close();

        assert!(!registry.publish_if_changed(2));
        assert_eq!(registry.current(), 1);
    }

    #[test]
    fn test_remove_stops_delivery() {
        let registry = ListenerRegistry::new(0u32);
        let (seen, listener) = recorder();
        let id = registry.register(listener).unwrap();

        assert_eq!(registry.remove(id), 0);
        registry.publish(5);
        assert_eq!(*seen.lock(), vec![0]);
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let registry = ListenerRegistry::new(0u32);
        let (seen, listener) = recorder();
        registry.register(listener).unwrap();

        assert!(registry.close());
        assert!(!registry.close());
        assert!(registry.is_closed());

        registry.publish(9);
        let (_, late) = recorder::<u32>();
        assert!(registry.register(late).is_none());
        assert_eq!(*seen.lock(), vec![0]);
    }

    #[test]
    fn test_listener_can_remove_itself_reentrantly() {
        let registry = Arc::new(ListenerRegistry::new(0u32));
        let own_id = Arc::new(Mutex::new(None::<ListenerId>));
        let calls = Arc::new(Mutex::new(0));

        let (reg, id_slot, counter) = (Arc::clone(&registry), Arc::clone(&own_id), Arc::clone(&calls));
        let id = registry
            .register(Arc::new(move |v: &u32| {
                *counter.lock() += 1;
                if *v == 1 {
                    if let Some(id) = *id_slot.lock() {
                        reg.remove(id);
                    }
                }
            }))
            .unwrap();
        *own_id.lock() = Some(id);

        registry.publish(1);
        registry.publish(2);

        // Initial delivery plus the publish that removed it
        assert_eq!(*calls.lock(), 2);
    }

    #[test]
    fn test_listener_removing_peer_skips_peer() {
        let registry = Arc::new(ListenerRegistry::new(0u32));
        let peer_id = Arc::new(Mutex::new(None::<ListenerId>));

        let (reg, slot) = (Arc::clone(&registry), Arc::clone(&peer_id));
        registry
            .register(Arc::new(move |v: &u32| {
                if *v == 7 {
                    if let Some(id) = *slot.lock() {
                        reg.remove(id);
                    }
                }
            }))
            .unwrap();

        let (seen, peer) = recorder();
        *peer_id.lock() = registry.register(peer);

        registry.publish(7);
        assert_eq!(*seen.lock(), vec![0]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let registry = ListenerRegistry::new(0u32);
        registry
            .register(Arc::new(|v: &u32| {
                if *v > 0 {
                    panic!("boom");
                }
            }))
            .unwrap();
        let (seen, listener) = recorder();
        registry.register(listener).unwrap();

        registry.publish(3);
        assert_eq!(*seen.lock(), vec![0, 3]);
    }

    #[test]
    fn test_publish_order_across_threads() {
        let registry = Arc::new(ListenerRegistry::new(0u32));
        let (seen, listener) = recorder();
        registry.register(listener).unwrap();

        let handles: Vec<_> = (1..=4)
            .map(|t| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..25 {
                        reg.publish(t * 100 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 101);
        // Each publisher's values arrive in the order it published them
        for t in 1..=4u32 {
            let mine: Vec<_> = seen.iter().filter(|v| **v / 100 == t).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
        assert_eq!(registry.current(), *seen.last().unwrap());
    }
}
