//! Data-location change fan-in
//!
//! One bus per ring group, threaded down to rings and hosts at wiring time.
//! Contributing events: ring membership, host membership, host state, and
//! host-domain membership. Partition-level events (partition add, deletable
//! toggle) deliberately do not publish here; their deltas surface downstream
//! with the next host state transition.

use crate::watch::ListenerHandle;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type BusListener = Arc<dyn Fn() + Send + Sync>;

struct BusInner {
    listeners: Mutex<BTreeMap<u64, BusListener>>,
    next_listener: AtomicU64,
}

/// Fan-in of serving-topology events for one ring group.
#[derive(Clone)]
pub struct DataLocationBus {
    inner: Arc<BusInner>,
}

impl DataLocationBus {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: Mutex::new(BTreeMap::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerHandle {
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .insert(id, Arc::new(listener));
        ListenerHandle(id)
    }

    pub(crate) fn unsubscribe(&self, handle: ListenerHandle) {
        self.inner.listeners.lock().unwrap().remove(&handle.0);
    }

    pub(crate) fn clear(&self) {
        self.inner.listeners.lock().unwrap().clear();
    }

    /// Publish one contributing event. Runs on the session dispatch thread,
    /// so deliveries stay ordered with the node events that caused them.
    pub(crate) fn publish(&self) {
        let listeners: Vec<BusListener> = self
            .inner
            .listeners
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_publish_reaches_all_listeners() {
        let bus = DataLocationBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls_in_listener = Arc::clone(&calls);
            bus.subscribe(move || {
                calls_in_listener.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.publish();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = DataLocationBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_listener = Arc::clone(&calls);
        let handle = bus.subscribe(move || {
            calls_in_listener.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish();
        bus.unsubscribe(handle);
        bus.publish();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
