//! Coordination namespace: a hierarchical, watchable tree of small values
//!
//! The namespace is the shared substrate of the coordination core:
//! - Every node carries a byte payload, a version token, and (for ephemerals)
//!   an owning session
//! - Watches are one-shot: a fired watch is consumed and must be re-registered
//! - Each session has a single dispatch thread; its watch events are
//!   delivered serially in mutation order
//! - Ephemeral nodes vanish with their session

pub mod client;
pub mod memory;
pub mod path;

pub use client::NamespaceClient;
pub use memory::MemoryNamespace;

use std::sync::Arc;

/// Node creation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Node survives the creating session
    Persistent,
    /// Node is deleted when the creating session ends
    Ephemeral,
}

/// A watch callback delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    NodeCreated(String),
    NodeDataChanged(String),
    NodeDeleted(String),
    ChildrenChanged(String),
    /// The session that registered the watch expired; registrations are gone
    /// and the observer must re-arm against the replacement session.
    SessionExpired,
}

/// Watch callback. Invoked on the owning session's dispatch thread.
pub type Watcher = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

/// One node creation within a [`MemoryNamespace::create_many`] batch
#[derive(Debug, Clone)]
pub struct CreateOp {
    pub path: String,
    pub data: Vec<u8>,
    pub mode: CreateMode,
}

impl CreateOp {
    pub fn persistent(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
            mode: CreateMode::Persistent,
        }
    }

    pub fn ephemeral(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
            mode: CreateMode::Ephemeral,
        }
    }
}
