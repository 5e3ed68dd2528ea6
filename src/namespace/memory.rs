//! In-process coordination namespace
//!
//! A hierarchical store of versioned nodes with one-shot watches and session
//! semantics. Mutations are applied under a single store lock; watch events
//! are queued to the registering session's dispatch thread while the lock is
//! held, so every session observes mutations in a single global order.
//!
//! Sessions model the remote-ensemble contract: an expired session loses its
//! watch registrations and ephemeral nodes, and the client transparently
//! continues under a replacement session id. Observers get a
//! `SessionExpired` event and must re-arm.

use crate::common::{Error, Result};
use crate::namespace::client::NamespaceClient;
use crate::namespace::{path, CreateMode, CreateOp, WatchEvent, Watcher};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

struct NodeRecord {
    data: Vec<u8>,
    version: u64,
    ephemeral_owner: Option<u64>,
}

struct WatchReg {
    session: u64,
    watcher: Watcher,
}

enum Dispatch {
    Event(Watcher, WatchEvent),
    Shutdown,
}

struct SessionRecord {
    tx: mpsc::Sender<Dispatch>,
}

struct State {
    nodes: BTreeMap<String, NodeRecord>,
    data_watches: HashMap<String, Vec<WatchReg>>,
    child_watches: HashMap<String, Vec<WatchReg>>,
    sessions: HashMap<u64, SessionRecord>,
    next_session_id: u64,
}

impl State {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            NodeRecord {
                data: Vec::new(),
                version: 0,
                ephemeral_owner: None,
            },
        );
        Self {
            nodes,
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
            sessions: HashMap::new(),
            next_session_id: 1,
        }
    }

    fn child_names(&self, parent: &str) -> Vec<String> {
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{parent}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| {
                let child = &key[prefix.len()..];
                !child.is_empty() && !child.contains('/')
            })
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect()
    }

    fn has_children(&self, parent: &str) -> bool {
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{parent}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .any(|(key, _)| key.len() > prefix.len())
    }

    /// Queue an event to every data watch on `node_path`, consuming them.
    fn fire_data_watches(&mut self, node_path: &str, event: WatchEvent) {
        if let Some(regs) = self.data_watches.remove(node_path) {
            for reg in regs {
                self.deliver(reg, event.clone());
            }
        }
    }

    /// Queue an event to every child watch on `parent_path`, consuming them.
    fn fire_child_watches(&mut self, parent_path: &str) {
        if let Some(regs) = self.child_watches.remove(parent_path) {
            for reg in regs {
                self.deliver(reg, WatchEvent::ChildrenChanged(parent_path.to_string()));
            }
        }
    }

    fn deliver(&self, reg: WatchReg, event: WatchEvent) {
        if let Some(session) = self.sessions.get(&reg.session) {
            // A send failure means the session is tearing down; the watch is
            // gone with it.
            let _ = session.tx.send(Dispatch::Event(reg.watcher, event));
        }
    }

    fn remove_session_watches(&mut self, session: u64) -> Vec<Watcher> {
        let mut orphaned = Vec::new();
        for regs in self
            .data_watches
            .values_mut()
            .chain(self.child_watches.values_mut())
        {
            let mut kept = Vec::with_capacity(regs.len());
            for reg in regs.drain(..) {
                if reg.session == session {
                    orphaned.push(reg.watcher);
                } else {
                    kept.push(reg);
                }
            }
            *regs = kept;
        }
        self.data_watches.retain(|_, regs| !regs.is_empty());
        self.child_watches.retain(|_, regs| !regs.is_empty());
        orphaned
    }

    /// Delete every ephemeral owned by `session`, notifying surviving watches.
    fn reap_ephemerals(&mut self, session: u64) {
        let mut doomed: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(node_path, _)| node_path.clone())
            .collect();
        // Children before parents, though ephemerals cannot have children.
        doomed.sort_by(|a, b| b.cmp(a));
        for node_path in doomed {
            self.nodes.remove(&node_path);
            self.fire_data_watches(&node_path, WatchEvent::NodeDeleted(node_path.clone()));
            self.fire_child_watches(path::parent(&node_path));
        }
    }
}

/// The in-process coordination service. Shared by every client connected to it.
pub struct MemoryNamespace {
    state: Mutex<State>,
}

impl MemoryNamespace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::new()),
        })
    }

    /// Open a new session and return its client.
    pub fn connect(self: &Arc<Self>) -> NamespaceClient {
        let (tx, rx) = mpsc::channel::<Dispatch>();
        let session_id = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_session_id;
            state.next_session_id += 1;
            state.sessions.insert(id, SessionRecord { tx });
            id
        };
        let dispatch = std::thread::Builder::new()
            .name(format!("ns-dispatch-{session_id}"))
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    match message {
                        Dispatch::Event(watcher, event) => watcher(&event),
                        Dispatch::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn dispatch thread");
        NamespaceClient::new(Arc::clone(self), session_id, dispatch)
    }

    pub(crate) fn exists(&self, node_path: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.nodes.contains_key(node_path))
    }

    pub(crate) fn get(&self, node_path: &str) -> Result<Option<(Vec<u8>, u64)>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .get(node_path)
            .map(|node| (node.data.clone(), node.version)))
    }

    /// Read a node and register a data-and-existence watch in one step.
    ///
    /// The watch is registered whether or not the node exists, so observers
    /// of absent nodes learn about creation.
    pub(crate) fn get_watch(
        &self,
        session: u64,
        node_path: &str,
        watcher: Watcher,
    ) -> Result<Option<(Vec<u8>, u64)>> {
        let mut state = self.state.lock().unwrap();
        if !state.sessions.contains_key(&session) {
            return Err(Error::Interrupted);
        }
        let current = state
            .nodes
            .get(node_path)
            .map(|node| (node.data.clone(), node.version));
        state
            .data_watches
            .entry(node_path.to_string())
            .or_default()
            .push(WatchReg { session, watcher });
        Ok(current)
    }

    pub(crate) fn create(
        &self,
        session: u64,
        node_path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<()> {
        self.create_many(
            session,
            &[CreateOp {
                path: node_path.to_string(),
                data: data.to_vec(),
                mode,
            }],
        )
    }

    /// Apply a batch of creations atomically: either every node is created
    /// and watchers see all of them, or none is.
    pub(crate) fn create_many(&self, session: u64, ops: &[CreateOp]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.sessions.contains_key(&session) {
            return Err(Error::Interrupted);
        }

        // Validate the whole batch before touching the tree.
        let mut batch_paths: HashSet<&str> = HashSet::new();
        let mut batch_ephemerals: HashSet<&str> = HashSet::new();
        for op in ops {
            if !path::is_valid(&op.path) || op.path == "/" {
                return Err(Error::Internal(format!("invalid path: {}", op.path)));
            }
            if state.nodes.contains_key(&op.path) || batch_paths.contains(op.path.as_str()) {
                return Err(Error::AlreadyExists(op.path.clone()));
            }
            let parent = path::parent(&op.path);
            let parent_in_batch = batch_paths.contains(parent);
            match state.nodes.get(parent) {
                Some(node) if node.ephemeral_owner.is_some() => {
                    return Err(Error::Internal(format!(
                        "ephemeral node cannot have children: {parent}"
                    )));
                }
                Some(_) => {}
                None if parent_in_batch => {
                    if batch_ephemerals.contains(parent) {
                        return Err(Error::Internal(format!(
                            "ephemeral node cannot have children: {parent}"
                        )));
                    }
                }
                None => return Err(Error::NotFound(parent.to_string())),
            }
            batch_paths.insert(&op.path);
            if op.mode == CreateMode::Ephemeral {
                batch_ephemerals.insert(&op.path);
            }
        }

        let mut touched_parents: Vec<String> = Vec::new();
        for op in ops {
            state.nodes.insert(
                op.path.clone(),
                NodeRecord {
                    data: op.data.clone(),
                    version: 0,
                    ephemeral_owner: match op.mode {
                        CreateMode::Ephemeral => Some(session),
                        CreateMode::Persistent => None,
                    },
                },
            );
            let parent = path::parent(&op.path).to_string();
            if !touched_parents.contains(&parent) {
                touched_parents.push(parent);
            }
        }
        for op in ops {
            state.fire_data_watches(&op.path, WatchEvent::NodeCreated(op.path.clone()));
        }
        for parent in touched_parents {
            state.fire_child_watches(&parent);
        }
        Ok(())
    }

    pub(crate) fn set(&self, node_path: &str, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(node_path)
            .ok_or_else(|| Error::NotFound(node_path.to_string()))?;
        node.data = data.to_vec();
        node.version += 1;
        state.fire_data_watches(node_path, WatchEvent::NodeDataChanged(node_path.to_string()));
        Ok(())
    }

    /// Conditional write against the node's version token.
    pub(crate) fn compare_and_set(
        &self,
        node_path: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(node_path)
            .ok_or_else(|| Error::NotFound(node_path.to_string()))?;
        if node.version != expected_version {
            return Err(Error::ConflictingVersion {
                path: node_path.to_string(),
                expected: expected_version,
                actual: node.version,
            });
        }
        node.data = data.to_vec();
        node.version += 1;
        state.fire_data_watches(node_path, WatchEvent::NodeDataChanged(node_path.to_string()));
        Ok(())
    }

    pub(crate) fn children(&self, node_path: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if !state.nodes.contains_key(node_path) {
            return Err(Error::NotFound(node_path.to_string()));
        }
        Ok(state.child_names(node_path))
    }

    pub(crate) fn children_watch(
        &self,
        session: u64,
        node_path: &str,
        watcher: Watcher,
    ) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        if !state.sessions.contains_key(&session) {
            return Err(Error::Interrupted);
        }
        if !state.nodes.contains_key(node_path) {
            return Err(Error::NotFound(node_path.to_string()));
        }
        let names = state.child_names(node_path);
        state
            .child_watches
            .entry(node_path.to_string())
            .or_default()
            .push(WatchReg { session, watcher });
        Ok(names)
    }

    pub(crate) fn delete(&self, node_path: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.nodes.contains_key(node_path) {
            return Err(Error::NotFound(node_path.to_string()));
        }
        if state.has_children(node_path) {
            return Err(Error::NotEmpty(node_path.to_string()));
        }
        state.nodes.remove(node_path);
        state.fire_data_watches(node_path, WatchEvent::NodeDeleted(node_path.to_string()));
        state.fire_child_watches(path::parent(node_path));
        Ok(())
    }

    /// Expire a session: its watches and ephemerals are dropped, surviving
    /// sessions are notified of the vanished ephemerals, and the orphaned
    /// watchers receive `SessionExpired` under a fresh session id.
    ///
    /// Returns the replacement session id.
    pub(crate) fn expire(&self, old_session: u64) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .sessions
            .remove(&old_session)
            .ok_or(Error::SessionLost)?;
        let new_session = state.next_session_id;
        state.next_session_id += 1;

        let orphaned = state.remove_session_watches(old_session);
        state.reap_ephemerals(old_session);

        for watcher in &orphaned {
            let _ = record
                .tx
                .send(Dispatch::Event(Arc::clone(watcher), WatchEvent::SessionExpired));
        }
        state.sessions.insert(new_session, record);
        tracing::debug!(
            old_session,
            new_session,
            watches = orphaned.len(),
            "session expired"
        );
        Ok(new_session)
    }

    /// Tear a session down for good: ephemerals reaped, watches dropped,
    /// dispatch thread asked to stop.
    pub(crate) fn close_session(&self, session: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.sessions.remove(&session) {
            state.remove_session_watches(session);
            state.reap_ephemerals(session);
            let _ = record.tx.send(Dispatch::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::wait_until;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_create_get_set_delete() {
        let ns = MemoryNamespace::new();
        let client = ns.connect();

        client
            .create("/a", b"one", CreateMode::Persistent)
            .unwrap();
        assert_eq!(client.get("/a").unwrap().unwrap(), b"one");

        client.set("/a", b"two").unwrap();
        assert_eq!(client.get("/a").unwrap().unwrap(), b"two");

        client.delete("/a").unwrap();
        assert!(client.get("/a").unwrap().is_none());
    }

    #[test]
    fn test_create_requires_parent() {
        let ns = MemoryNamespace::new();
        let client = ns.connect();
        let err = client
            .create("/missing/child", b"", CreateMode::Persistent)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_delete_not_empty() {
        let ns = MemoryNamespace::new();
        let client = ns.connect();
        client.create("/a", b"", CreateMode::Persistent).unwrap();
        client.create("/a/b", b"", CreateMode::Persistent).unwrap();
        assert!(matches!(client.delete("/a"), Err(Error::NotEmpty(_))));
    }

    #[test]
    fn test_compare_and_set() {
        let ns = MemoryNamespace::new();
        let client = ns.connect();
        client.create("/n", b"0", CreateMode::Persistent).unwrap();

        let (_, version) = client.get_with_version("/n").unwrap().unwrap();
        client.compare_and_set("/n", b"1", version).unwrap();

        // Stale token is rejected.
        let err = client.compare_and_set("/n", b"2", version).unwrap_err();
        assert!(matches!(err, Error::ConflictingVersion { .. }));
        assert_eq!(client.get("/n").unwrap().unwrap(), b"1");
    }

    #[test]
    fn test_data_watch_fires_once() {
        let ns = MemoryNamespace::new();
        let client = ns.connect();
        client.create("/w", b"0", CreateMode::Persistent).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_watch = Arc::clone(&fired);
        client
            .get_watch(
                "/w",
                Arc::new(move |_event| {
                    fired_in_watch.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        client.set("/w", b"1").unwrap();
        wait_until(|| fired.load(Ordering::SeqCst) == 1);

        // One-shot: a second mutation does not re-fire the consumed watch.
        client.set("/w", b"2").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exists_watch_sees_creation() {
        let ns = MemoryNamespace::new();
        let client = ns.connect();

        let created = Arc::new(AtomicUsize::new(0));
        let created_in_watch = Arc::clone(&created);
        let current = client
            .get_watch(
                "/later",
                Arc::new(move |event| {
                    if matches!(event, WatchEvent::NodeCreated(_)) {
                        created_in_watch.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();
        assert!(current.is_none());

        client.create("/later", b"x", CreateMode::Persistent).unwrap();
        wait_until(|| created.load(Ordering::SeqCst) == 1);
    }

    #[test]
    fn test_child_watch() {
        let ns = MemoryNamespace::new();
        let client = ns.connect();
        client.create("/dir", b"", CreateMode::Persistent).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_watch = Arc::clone(&fired);
        let names = client
            .children_watch(
                "/dir",
                Arc::new(move |_event| {
                    fired_in_watch.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert!(names.is_empty());

        client
            .create("/dir/a", b"", CreateMode::Persistent)
            .unwrap();
        wait_until(|| fired.load(Ordering::SeqCst) == 1);
    }

    #[test]
    fn test_ephemeral_reaped_on_expiry() {
        let ns = MemoryNamespace::new();
        let holder = ns.connect();
        let observer = ns.connect();

        holder
            .create("/lock", b"ACTIVE", CreateMode::Ephemeral)
            .unwrap();
        assert!(observer.exists("/lock").unwrap());

        let deleted = Arc::new(AtomicUsize::new(0));
        let deleted_in_watch = Arc::clone(&deleted);
        observer
            .get_watch(
                "/lock",
                Arc::new(move |event| {
                    if matches!(event, WatchEvent::NodeDeleted(_)) {
                        deleted_in_watch.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();

        holder.simulate_session_expiry().unwrap();
        wait_until(|| deleted.load(Ordering::SeqCst) == 1);
        assert!(!observer.exists("/lock").unwrap());
    }

    #[test]
    fn test_expired_session_watchers_get_session_event() {
        let ns = MemoryNamespace::new();
        let client = ns.connect();
        client.create("/n", b"0", CreateMode::Persistent).unwrap();

        let expired = Arc::new(AtomicUsize::new(0));
        let expired_in_watch = Arc::clone(&expired);
        client
            .get_watch(
                "/n",
                Arc::new(move |event| {
                    if matches!(event, WatchEvent::SessionExpired) {
                        expired_in_watch.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();

        client.simulate_session_expiry().unwrap();
        wait_until(|| expired.load(Ordering::SeqCst) == 1);

        // The client keeps working under the replacement session.
        client.set("/n", b"1").unwrap();
        assert_eq!(client.get("/n").unwrap().unwrap(), b"1");
    }

    #[test]
    fn test_create_many_is_atomic() {
        let ns = MemoryNamespace::new();
        let client = ns.connect();
        client.create("/h", b"", CreateMode::Persistent).unwrap();

        let ops = vec![
            CreateOp::persistent("/h/a", *b""),
            CreateOp::persistent("/h/a/b", *b""),
            CreateOp::persistent("/h", *b""), // conflicts
        ];
        assert!(matches!(
            client.create_many(&ops),
            Err(Error::AlreadyExists(_))
        ));
        // Nothing from the failed batch landed.
        assert!(!client.exists("/h/a").unwrap());

        let ops = vec![
            CreateOp::persistent("/h/a", *b""),
            CreateOp::persistent("/h/a/b", *b"leaf"),
        ];
        client.create_many(&ops).unwrap();
        assert_eq!(client.get("/h/a/b").unwrap().unwrap(), b"leaf");
    }
}
