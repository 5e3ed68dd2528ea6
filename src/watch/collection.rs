//! Children-of-a-path reactive set

use crate::common::{Error, Result};
use crate::namespace::{NamespaceClient, WatchEvent};
use crate::watch::{Detachable, ListenerHandle};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

type ChildFactory<E> = Box<dyn Fn(&str) -> Result<E> + Send + Sync>;
type NameFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;
type DirListener = Arc<dyn Fn() + Send + Sync>;

struct DirInner<E: Detachable> {
    client: NamespaceClient,
    path: String,
    factory: ChildFactory<E>,
    filter: Option<NameFilter>,
    entries: RwLock<BTreeMap<String, E>>,
    listeners: Mutex<BTreeMap<u64, DirListener>>,
    next_listener: AtomicU64,
    cancelled: AtomicBool,
}

/// A reactive map from child name to façade, tracking the children of one
/// parent node.
///
/// Membership changes diff old against new names: added children get a
/// façade from the factory, removed ones are detached. A callback that
/// observes an identical child set is a no-op and does not re-fire
/// listeners. Ordering of children is not meaningful.
pub struct WatchedDir<E: Detachable> {
    inner: Arc<DirInner<E>>,
}

impl<E: Detachable> Clone for WatchedDir<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Detachable + Clone + Send + Sync + 'static> WatchedDir<E> {
    /// Bind to the children of `path`, constructing a façade per child.
    pub fn attach(
        client: NamespaceClient,
        path: impl Into<String>,
        factory: impl Fn(&str) -> Result<E> + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::attach_inner(client, path.into(), Box::new(factory), None)
    }

    /// Like [`attach`](Self::attach), tracking only children whose name
    /// passes the filter.
    pub fn attach_filtered(
        client: NamespaceClient,
        path: impl Into<String>,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
        factory: impl Fn(&str) -> Result<E> + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::attach_inner(client, path.into(), Box::new(factory), Some(Box::new(filter)))
    }

    fn attach_inner(
        client: NamespaceClient,
        path: String,
        factory: ChildFactory<E>,
        filter: Option<NameFilter>,
    ) -> Result<Self> {
        let inner = Arc::new(DirInner {
            client,
            path,
            factory,
            filter,
            entries: RwLock::new(BTreeMap::new()),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        });
        DirInner::resync(&inner)?;
        Ok(Self { inner })
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn get(&self, name: &str) -> Option<E> {
        self.inner.entries.read().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.entries.read().unwrap().keys().cloned().collect()
    }

    /// Snapshot of the current membership.
    pub fn values(&self) -> Vec<E> {
        self.inner.entries.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().unwrap().is_empty()
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerHandle {
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
}

impl<E: Detachable + Clone + Send + Sync + 'static> Detachable for WatchedDir<E> {
    /// Stop re-arming; detach every held façade and drop listeners.
    fn detach(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.listeners.lock().unwrap().clear();
        let entries = std::mem::take(&mut *self.inner.entries.write().unwrap());
        for entry in entries.values() {
            entry.detach();
        }
    }
}

impl<E: Detachable + Clone + Send + Sync + 'static> DirInner<E> {
    /// Re-list children, re-arm the watch, and reconcile the façade map.
    /// Returns whether membership changed.
    fn resync(inner: &Arc<Self>) -> Result<bool> {
        if inner.cancelled.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let weak = Arc::downgrade(inner);
        let listed = inner.client.children_watch(
            &inner.path,
            Arc::new(move |event| Self::on_event(&weak, event)),
        );
        let names: BTreeSet<String> = match listed {
            Ok(names) => names
                .into_iter()
                .filter(|name| inner.filter.as_ref().map_or(true, |f| f(name)))
                .collect(),
            Err(Error::NotFound(_)) => {
                // Parent vanished: the façade owning this dir is being torn
                // down; empty the membership and stop.
                inner.cancelled.store(true, Ordering::SeqCst);
                let entries = std::mem::take(&mut *inner.entries.write().unwrap());
                for entry in entries.values() {
                    entry.detach();
                }
                return Ok(!entries.is_empty());
            }
            Err(e) => return Err(e),
        };

        let mut entries = inner.entries.write().unwrap();
        let known: BTreeSet<String> = entries.keys().cloned().collect();
        if known == names {
            return Ok(false);
        }
        for removed in known.difference(&names) {
            if let Some(entry) = entries.remove(removed) {
                entry.detach();
            }
        }
        for added in names.difference(&known) {
            match (inner.factory)(added) {
                Ok(entry) => {
                    entries.insert(added.clone(), entry);
                }
                Err(e) => {
                    tracing::warn!(
                        parent = %inner.path,
                        child = %added,
                        error = %e,
                        "failed to construct child façade"
                    );
                }
            }
        }
        Ok(true)
    }

    fn on_event(weak: &Weak<Self>, event: &WatchEvent) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.cancelled.load(Ordering::SeqCst) {
            return;
        }
        debug_assert!(matches!(
            event,
            WatchEvent::ChildrenChanged(_) | WatchEvent::SessionExpired
        ));
        match Self::resync(&inner) {
            Ok(true) => {
                let listeners: Vec<DirListener> =
                    inner.listeners.lock().unwrap().values().cloned().collect();
                for listener in listeners {
                    listener();
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(path = %inner.path, error = %e, "children watch re-arm failed");
            }
        }
    }
}
