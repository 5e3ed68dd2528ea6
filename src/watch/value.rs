//! Single-node reactive cell

use crate::common::Result;
use crate::namespace::{CreateMode, NamespaceClient, WatchEvent};
use crate::watch::{Detachable, ListenerHandle, NodeValue};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

type CellListener<T> = Arc<dyn Fn(Option<&T>) + Send + Sync>;

struct CellInner<T: NodeValue> {
    client: NamespaceClient,
    path: String,
    value: RwLock<Option<T>>,
    listeners: Mutex<BTreeMap<u64, CellListener<T>>>,
    next_listener: AtomicU64,
    cancelled: AtomicBool,
}

/// A typed view of one node, kept current by one-shot watches.
///
/// Queries answer from the cached value and never block. Each node event
/// triggers an atomic re-read plus watch re-arm; on session expiry the cell
/// re-arms from scratch without dropping subscribers. Newly registered
/// listeners are not seeded with the current value.
pub struct WatchedCell<T: NodeValue> {
    inner: Arc<CellInner<T>>,
}

impl<T: NodeValue> Clone for WatchedCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: NodeValue> WatchedCell<T> {
    /// Bind to `path`: read the current value and arm the watch in one step.
    pub fn attach(client: NamespaceClient, path: impl Into<String>) -> Result<Self> {
        let inner = Arc::new(CellInner {
            client,
            path: path.into(),
            value: RwLock::new(None),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        });
        CellInner::rearm(&inner)?;
        Ok(Self { inner })
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Last observed value; `None` when the node is absent or malformed.
    pub fn get(&self) -> Option<T> {
        self.inner.value.read().unwrap().clone()
    }

    /// Write through to the namespace, creating the node if needed. The
    /// cached value updates only once the watch callback fires.
    pub fn set(&self, value: &T) -> Result<()> {
        self.inner
            .client
            .set_or_create(&self.inner.path, &value.encode(), CreateMode::Persistent)
    }

    /// Authoritative read of the node with its version token, for
    /// counter-style cells.
    pub fn get_with_version(&self) -> Result<Option<(T, u64)>> {
        match self.inner.client.get_with_version(&self.inner.path)? {
            None => Ok(None),
            Some((data, version)) => {
                let value = T::decode(&data).map_err(|e| e.at_path(&self.inner.path))?;
                Ok(Some((value, version)))
            }
        }
    }

    /// Conditional write against the version token from
    /// [`get_with_version`](Self::get_with_version). Fails with
    /// `ConflictingVersion` when another writer got there first.
    pub fn compare_and_set(&self, value: &T, expected_version: u64) -> Result<()> {
        self.inner
            .client
            .compare_and_set(&self.inner.path, &value.encode(), expected_version)
    }

    pub fn subscribe(&self, listener: impl Fn(Option<&T>) + Send + Sync + 'static) -> ListenerHandle {
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .insert(id, Arc::new(listener));
        ListenerHandle(id)
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) {
        self.inner.listeners.lock().unwrap().remove(&handle.0);
    }

    /// Stop re-arming and drop all listeners.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.listeners.lock().unwrap().clear();
    }
}

impl<T: NodeValue> Detachable for WatchedCell<T> {
    fn detach(&self) {
        self.cancel();
    }
}

impl<T: NodeValue> CellInner<T> {
    /// Re-read the node and re-register the watch, atomically from the
    /// store's perspective. Returns the freshly observed value.
    fn rearm(inner: &Arc<Self>) -> Result<Option<T>> {
        if inner.cancelled.load(Ordering::SeqCst) {
            return Ok(inner.value.read().unwrap().clone());
        }
        let weak = Arc::downgrade(inner);
        let raw = inner.client.get_watch(
            &inner.path,
            Arc::new(move |event| Self::on_event(&weak, event)),
        )?;
        let decoded = match raw {
            None => None,
            Some(data) => match T::decode(&data) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(path = %inner.path, error = %e, "undecodable node payload");
                    None
                }
            },
        };
        *inner.value.write().unwrap() = decoded.clone();
        Ok(decoded)
    }

    fn on_event(weak: &Weak<Self>, event: &WatchEvent) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let previous = inner.value.read().unwrap().clone();
        let current = match Self::rearm(&inner) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(path = %inner.path, error = %e, "watch re-arm failed");
                return;
            }
        };
        // Session expiry is a rebind, not a change: notify only if the value
        // moved while the watch was dark.
        let fire = match event {
            WatchEvent::SessionExpired => previous != current,
            _ => true,
        };
        if fire {
            let listeners: Vec<CellListener<T>> =
                inner.listeners.lock().unwrap().values().cloned().collect();
            for listener in listeners {
                listener(current.as_ref());
            }
        }
    }
}
