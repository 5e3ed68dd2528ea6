//! Coordination metadata layer
//!
//! The coordinator is the process-wide handle to the metadata graph. It owns
//! the three top-level collections (domains, domain groups, ring groups) and
//! resolves entities by name. Queries answer from watched state; mutations
//! write through to the namespace and become visible asynchronously.

pub mod data_location;
pub mod domain;
pub mod domain_group;
pub mod host;
pub mod http;
pub mod ring;
pub mod ring_group;

pub use domain::{Domain, DomainVersion};
pub use domain_group::{DomainGroup, DomainGroupVersion};
pub use host::{Host, HostDomain, HostDomainPartition, HostState, PartitionServerAddress};
pub use ring::Ring;
pub use ring_group::{RingGroup, RingGroupConductorMode};

use crate::common::Result;
use crate::namespace::{path, NamespaceClient};
use crate::watch::{Detachable, WatchedDir};
use std::sync::Arc;

const DOMAINS_SUBTREE: &str = "domains";
const DOMAIN_GROUPS_SUBTREE: &str = "domain_groups";
const RING_GROUPS_SUBTREE: &str = "ring_groups";

struct CoordinatorInner {
    client: NamespaceClient,
    domains_root: String,
    domain_groups_root: String,
    ring_groups_root: String,
    domains: WatchedDir<Domain>,
    domain_groups: WatchedDir<DomainGroup>,
    ring_groups: WatchedDir<RingGroup>,
}

/// Root registry over the coordination namespace.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    /// Open the metadata graph rooted at `root`, materializing the three
    /// subtree roots if absent.
    pub fn open(client: NamespaceClient, root: &str) -> Result<Coordinator> {
        let domains_root = path::join(root, DOMAINS_SUBTREE);
        let domain_groups_root = path::join(root, DOMAIN_GROUPS_SUBTREE);
        let ring_groups_root = path::join(root, RING_GROUPS_SUBTREE);
        client.ensure_path(&domains_root)?;
        client.ensure_path(&domain_groups_root)?;
        client.ensure_path(&ring_groups_root)?;

        let domains_factory_client = client.clone();
        let domains_factory_root = domains_root.clone();
        let domains = WatchedDir::attach(client.clone(), domains_root.clone(), move |name| {
            Domain::attach(
                domains_factory_client.clone(),
                path::join(&domains_factory_root, name),
            )
        })?;

        let groups_factory_client = client.clone();
        let groups_factory_root = domain_groups_root.clone();
        let domain_groups =
            WatchedDir::attach(client.clone(), domain_groups_root.clone(), move |name| {
                DomainGroup::attach(
                    groups_factory_client.clone(),
                    path::join(&groups_factory_root, name),
                )
            })?;

        let rg_factory_client = client.clone();
        let rg_factory_root = ring_groups_root.clone();
        let ring_groups =
            WatchedDir::attach(client.clone(), ring_groups_root.clone(), move |name| {
                RingGroup::attach(
                    rg_factory_client.clone(),
                    path::join(&rg_factory_root, name),
                )
            })?;

        tracing::info!(
            root,
            domains = domains.len(),
            domain_groups = domain_groups.len(),
            ring_groups = ring_groups.len(),
            "coordinator opened"
        );

        Ok(Coordinator {
            inner: Arc::new(CoordinatorInner {
                client,
                domains_root,
                domain_groups_root,
                ring_groups_root,
                domains,
                domain_groups,
                ring_groups,
            }),
        })
    }

    // === Lookups ===

    pub fn get_domain(&self, name: &str) -> Option<Domain> {
        self.inner.domains.get(name)
    }

    pub fn get_domains(&self) -> Vec<Domain> {
        self.inner.domains.values()
    }

    pub fn get_domain_group(&self, name: &str) -> Option<DomainGroup> {
        self.inner.domain_groups.get(name)
    }

    pub fn get_domain_groups(&self) -> Vec<DomainGroup> {
        self.inner.domain_groups.values()
    }

    pub fn get_ring_group(&self, name: &str) -> Option<RingGroup> {
        self.inner.ring_groups.get(name)
    }

    pub fn get_ring_groups(&self) -> Vec<RingGroup> {
        self.inner.ring_groups.values()
    }

    // === Administrative writes ===

    pub fn add_domain(
        &self,
        name: &str,
        num_partitions: i32,
        storage_engine_factory_class: &str,
        storage_engine_options: &str,
    ) -> Result<Domain> {
        Domain::create(
            &self.inner.client,
            &self.inner.domains_root,
            name,
            num_partitions,
            storage_engine_factory_class,
            storage_engine_options,
        )
    }

    pub fn add_domain_group(&self, name: &str) -> Result<DomainGroup> {
        DomainGroup::create(&self.inner.client, &self.inner.domain_groups_root, name)
    }

    /// Create a ring group serving `domain_group_name`.
    pub fn add_ring_group(&self, name: &str, domain_group_name: &str) -> Result<RingGroup> {
        RingGroup::create(
            &self.inner.client,
            &self.inner.ring_groups_root,
            name,
            &path::join(&self.inner.domain_groups_root, domain_group_name),
        )
    }

    pub fn delete_domain(&self, name: &str) -> Result<bool> {
        let domain_path = path::join(&self.inner.domains_root, name);
        if !self.inner.client.exists(&domain_path)? {
            return Ok(false);
        }
        self.inner.client.delete_recursive(&domain_path)?;
        Ok(true)
    }

    pub fn delete_domain_group(&self, name: &str) -> Result<bool> {
        let group_path = path::join(&self.inner.domain_groups_root, name);
        if !self.inner.client.exists(&group_path)? {
            return Ok(false);
        }
        self.inner.client.delete_recursive(&group_path)?;
        Ok(true)
    }

    pub fn delete_ring_group(&self, name: &str) -> Result<bool> {
        let group_path = path::join(&self.inner.ring_groups_root, name);
        if !self.inner.client.exists(&group_path)? {
            return Ok(false);
        }
        self.inner.client.delete_recursive(&group_path)?;
        Ok(true)
    }

    /// The underlying session-scoped client.
    pub fn client(&self) -> &NamespaceClient {
        &self.inner.client
    }

    /// Detach every watch held by the metadata graph. The namespace client
    /// stays open; closing it is the owner's call.
    pub fn close(&self) {
        self.inner.domains.detach();
        self.inner.domain_groups.detach();
        self.inner.ring_groups.detach();
    }
}
