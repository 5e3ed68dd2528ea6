//! Namespace client: one session against the coordination service
//!
//! Thin adapter exposing untyped node operations plus typed conveniences for
//! the small decimal/string payloads the metadata layer persists. All
//! entities of a process share one client (and therefore one session);
//! ephemeral nodes are tied to that session's lifetime.

use crate::common::{Error, Result};
use crate::namespace::memory::MemoryNamespace;
use crate::namespace::{path, CreateMode, CreateOp, Watcher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

struct ClientInner {
    namespace: Arc<MemoryNamespace>,
    session: AtomicU64,
    closed: AtomicBool,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

/// A session-scoped handle to the coordination namespace. Cheap to clone.
#[derive(Clone)]
pub struct NamespaceClient {
    inner: Arc<ClientInner>,
}

impl NamespaceClient {
    pub(crate) fn new(
        namespace: Arc<MemoryNamespace>,
        session: u64,
        dispatch: JoinHandle<()>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                namespace,
                session: AtomicU64::new(session),
                closed: AtomicBool::new(false),
                dispatch: Mutex::new(Some(dispatch)),
            }),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.inner.session.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    // === Untyped operations ===

    pub fn exists(&self, node_path: &str) -> Result<bool> {
        self.check_open()?;
        self.inner.namespace.exists(node_path)
    }

    pub fn get(&self, node_path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_with_version(node_path)?.map(|(data, _)| data))
    }

    pub fn get_with_version(&self, node_path: &str) -> Result<Option<(Vec<u8>, u64)>> {
        self.check_open()?;
        self.inner.namespace.get(node_path)
    }

    /// Read and register a data-and-existence watch in one step.
    pub fn get_watch(&self, node_path: &str, watcher: Watcher) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self
            .inner
            .namespace
            .get_watch(self.session_id(), node_path, watcher)?
            .map(|(data, _)| data))
    }

    pub fn create(&self, node_path: &str, data: &[u8], mode: CreateMode) -> Result<()> {
        self.check_open()?;
        self.inner
            .namespace
            .create(self.session_id(), node_path, data, mode)
    }

    /// Apply a batch of creations atomically.
    pub fn create_many(&self, ops: &[CreateOp]) -> Result<()> {
        self.check_open()?;
        self.inner.namespace.create_many(self.session_id(), ops)
    }

    pub fn set(&self, node_path: &str, data: &[u8]) -> Result<()> {
        self.check_open()?;
        self.inner.namespace.set(node_path, data)
    }

    /// Conditional write against the node's version token.
    pub fn compare_and_set(
        &self,
        node_path: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<()> {
        self.check_open()?;
        self.inner
            .namespace
            .compare_and_set(node_path, data, expected_version)
    }

    /// Unconditional write, creating the node if it is absent.
    pub fn set_or_create(&self, node_path: &str, data: &[u8], mode: CreateMode) -> Result<()> {
        if self.exists(node_path)? {
            return self.set(node_path, data);
        }
        match self.create(node_path, data, mode) {
            // Lost a creation race; the set still wins the write.
            Err(Error::AlreadyExists(_)) => self.set(node_path, data),
            other => other,
        }
    }

    pub fn children(&self, node_path: &str) -> Result<Vec<String>> {
        self.check_open()?;
        self.inner.namespace.children(node_path)
    }

    /// List children and register a membership watch in one step.
    pub fn children_watch(&self, node_path: &str, watcher: Watcher) -> Result<Vec<String>> {
        self.check_open()?;
        self.inner
            .namespace
            .children_watch(self.session_id(), node_path, watcher)
    }

    pub fn delete(&self, node_path: &str) -> Result<()> {
        self.check_open()?;
        self.inner.namespace.delete(node_path)
    }

    pub fn delete_if_exists(&self, node_path: &str) -> Result<()> {
        match self.delete(node_path) {
            Err(Error::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Delete a subtree. Tolerates another actor deleting concurrently:
    /// a vanished node is success, a newly non-empty node is retried.
    pub fn delete_recursive(&self, node_path: &str) -> Result<()> {
        match self.delete(node_path) {
            Ok(()) => Ok(()),
            Err(Error::NotEmpty(_)) => {
                let children = match self.children(node_path) {
                    Ok(children) => children,
                    Err(Error::NotFound(_)) => return Ok(()),
                    Err(e) => return Err(e),
                };
                for child in children {
                    self.delete_recursive(&path::join(node_path, &child))?;
                }
                match self.delete(node_path) {
                    Err(Error::NotFound(_)) => Ok(()),
                    other => other,
                }
            }
            Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Create any missing ancestors of `node_path` (and the node itself) as
    /// empty persistent nodes.
    pub fn ensure_path(&self, node_path: &str) -> Result<()> {
        if !path::is_valid(node_path) {
            return Err(Error::Internal(format!("invalid path: {node_path}")));
        }
        let mut current = String::new();
        for component in node_path.trim_start_matches('/').split('/') {
            current.push('/');
            current.push_str(component);
            match self.create(&current, b"", CreateMode::Persistent) {
                Ok(()) | Err(Error::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // === Typed conveniences ===

    pub fn get_string(&self, node_path: &str) -> Result<Option<String>> {
        match self.get(node_path)? {
            None => Ok(None),
            Some(data) => String::from_utf8(data)
                .map(Some)
                .map_err(|e| Error::malformed(e.to_string()).at_path(node_path)),
        }
    }

    pub fn get_int(&self, node_path: &str) -> Result<i32> {
        self.get_int_or_null(node_path)?
            .ok_or_else(|| Error::NotFound(node_path.to_string()))
    }

    pub fn get_long(&self, node_path: &str) -> Result<i64> {
        self.get_long_or_null(node_path)?
            .ok_or_else(|| Error::NotFound(node_path.to_string()))
    }

    /// Absent node decodes to `None`; present-but-malformed data is an error.
    pub fn get_int_or_null(&self, node_path: &str) -> Result<Option<i32>> {
        Ok(self.get_long_or_null(node_path)?.map(|value| value as i32))
    }

    /// Absent node decodes to `None`; present-but-malformed data is an error.
    pub fn get_long_or_null(&self, node_path: &str) -> Result<Option<i64>> {
        match self.get_string(node_path)? {
            None => Ok(None),
            Some(text) => text
                .parse::<i64>()
                .map(Some)
                .map_err(|e| Error::malformed(e.to_string()).at_path(node_path)),
        }
    }

    pub fn create_int(&self, node_path: &str, value: i32) -> Result<()> {
        self.create(
            node_path,
            value.to_string().as_bytes(),
            CreateMode::Persistent,
        )
    }

    pub fn create_long(&self, node_path: &str, value: i64) -> Result<()> {
        self.create(
            node_path,
            value.to_string().as_bytes(),
            CreateMode::Persistent,
        )
    }

    pub fn set_int(&self, node_path: &str, value: i32) -> Result<()> {
        self.set(node_path, value.to_string().as_bytes())
    }

    pub fn set_long(&self, node_path: &str, value: i64) -> Result<()> {
        self.set(node_path, value.to_string().as_bytes())
    }

    pub fn set_string(&self, node_path: &str, value: &str) -> Result<()> {
        self.set(node_path, value.as_bytes())
    }

    // === Session control ===

    /// Force-expire the current session, as a dropped ensemble connection
    /// would. Ephemerals and watch registrations are lost; the client keeps
    /// working under a replacement session.
    pub fn simulate_session_expiry(&self) -> Result<()> {
        self.check_open()?;
        let new_session = self.inner.namespace.expire(self.session_id())?;
        self.inner.session.store(new_session, Ordering::SeqCst);
        Ok(())
    }

    /// Close the session. Pending watches are dropped, ephemerals reaped and
    /// further calls on any clone of this client fail with `Interrupted`.
    ///
    /// Must not be called from a listener (it joins the dispatch thread).
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.namespace.close_session(self.session_id());
        if let Some(handle) = self.inner.dispatch.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
