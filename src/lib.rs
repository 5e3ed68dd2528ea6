//! # hank
//!
//! Cluster coordination core for a distributed, read-only, partitioned
//! key-value serving system:
//! - Hierarchical metadata model: domains, domain groups, rings, ring groups,
//!   hosts, partition assignments
//! - Watch-driven change notification over a coordination namespace
//! - Leader election for the ring-group conductor role
//! - Fixed-width hash-indexed partition writer (Cueball)
//! - HTTP/JSON status API over the metadata graph
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              Observing processes              │
//! │  conductors │ partition servers │ API readers │
//! └───────────────────┬───────────────────────────┘
//!                     │ entity façades + listeners
//! ┌───────────────────▼───────────────────────────┐
//! │                 Coordinator                   │
//! │   domains/   domain_groups/   ring_groups/    │
//! └───────────────────┬───────────────────────────┘
//!                     │ watched cells + collections
//! ┌───────────────────▼───────────────────────────┐
//! │            Coordination namespace             │
//! │  versioned nodes │ ephemerals │ one-shot      │
//! │  watches │ per-session serial dispatch        │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use hank::coordinator::Coordinator;
//! use hank::namespace::MemoryNamespace;
//!
//! # fn main() -> hank::Result<()> {
//! let namespace = MemoryNamespace::new();
//! let client = namespace.connect();
//! let coordinator = Coordinator::open(client, "/hank")?;
//!
//! let group = coordinator.add_ring_group("alpha", "frontend")?;
//! let claimed = group.claim_ring_group_conductor(
//!     hank::coordinator::RingGroupConductorMode::Active,
//! )?;
//! assert!(claimed);
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod coordinator;
pub mod namespace;
pub mod storage;
pub mod watch;

// Re-export commonly used types
pub use common::{CoordinatorConfig, Error, Result};
pub use coordinator::Coordinator;
pub use namespace::{MemoryNamespace, NamespaceClient};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
