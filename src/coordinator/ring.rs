//! Ring façade: one complete replica of a domain group's partitioning

use crate::common::{Error, Result};
use crate::coordinator::data_location::DataLocationBus;
use crate::coordinator::host::{Host, PartitionServerAddress};
use crate::namespace::{path, CreateOp, NamespaceClient};
use crate::watch::{Detachable, WatchedCell, WatchedDir};
use std::sync::Arc;

pub(crate) const RING_PREFIX: &str = "ring-";
pub(crate) const VERSION: &str = "version";
pub(crate) const UPDATING_TO_VERSION: &str = "updating_to_version";
pub(crate) const HOSTS: &str = "hosts";

/// Child-node name of ring `number`
pub(crate) fn ring_name(number: u32) -> String {
    format!("{RING_PREFIX}{number}")
}

/// Parse a ring number out of a child name; zero-padded forms are accepted.
pub(crate) fn parse_ring_name(name: &str) -> Option<u32> {
    name.strip_prefix(RING_PREFIX)?.parse().ok()
}

struct RingInner {
    client: NamespaceClient,
    path: String,
    number: u32,
    version: WatchedCell<i32>,
    updating_to_version: WatchedCell<i32>,
    hosts: WatchedDir<Host>,
    bus: DataLocationBus,
}

/// One ring of a ring group.
#[derive(Clone)]
pub struct Ring {
    inner: Arc<RingInner>,
}

impl Ring {
    /// Materialize `ring-<number>` under a ring group and attach.
    pub(crate) fn create(
        client: &NamespaceClient,
        ring_group_path: &str,
        number: u32,
        bus: DataLocationBus,
    ) -> Result<Ring> {
        let ring_path = path::join(ring_group_path, &ring_name(number));
        client.create_many(&[
            CreateOp::persistent(ring_path.clone(), Vec::new()),
            CreateOp::persistent(path::join(&ring_path, HOSTS), Vec::new()),
        ])?;
        Self::attach(client.clone(), ring_path, bus)
    }

    /// Attach to an existing ring subtree.
    pub(crate) fn attach(
        client: NamespaceClient,
        ring_path: String,
        bus: DataLocationBus,
    ) -> Result<Ring> {
        let number = parse_ring_name(path::name(&ring_path))
            .ok_or_else(|| Error::malformed("not a ring node").at_path(&ring_path))?;
        let version = WatchedCell::attach(client.clone(), path::join(&ring_path, VERSION))?;
        let updating_to_version =
            WatchedCell::attach(client.clone(), path::join(&ring_path, UPDATING_TO_VERSION))?;

        let hosts_path = path::join(&ring_path, HOSTS);
        let factory_client = client.clone();
        let factory_path = hosts_path.clone();
        let factory_bus = bus.clone();
        let hosts = WatchedDir::attach(client.clone(), hosts_path, move |name| {
            Host::attach(
                factory_client.clone(),
                path::join(&factory_path, name),
                factory_bus.clone(),
            )
        })?;
        // Host membership is a serving-topology contributor.
        let membership_bus = bus.clone();
        hosts.subscribe(move || membership_bus.publish());

        Ok(Ring {
            inner: Arc::new(RingInner {
                client,
                path: ring_path,
                number,
                version,
                updating_to_version,
                hosts,
                bus,
            }),
        })
    }

    pub fn ring_number(&self) -> u32 {
        self.inner.number
    }

    pub fn version_number(&self) -> Option<i32> {
        self.inner.version.get()
    }

    pub fn set_version_number(&self, version: i32) -> Result<()> {
        self.inner.version.set(&version)
    }

    pub fn updating_to_version_number(&self) -> Option<i32> {
        self.inner.updating_to_version.get()
    }

    pub fn set_updating_to_version_number(&self, version: i32) -> Result<()> {
        self.inner.updating_to_version.set(&version)
    }

    /// Clear the update marker once a rollout lands.
    pub fn clear_updating_to_version_number(&self) -> Result<()> {
        self.inner
            .client
            .delete_if_exists(&path::join(&self.inner.path, UPDATING_TO_VERSION))
    }

    pub fn is_update_pending(&self) -> bool {
        self.updating_to_version_number().is_some()
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.inner.hosts.values()
    }

    pub fn get_host_by_address(&self, address: &PartitionServerAddress) -> Option<Host> {
        self.inner.hosts.get(&address.to_string())
    }

    /// Add a partition server to this ring. Fails with `AlreadyExists` if a
    /// host with this address is present.
    pub fn add_host(&self, address: &PartitionServerAddress, flags: &[String]) -> Result<Host> {
        Host::create(
            &self.inner.client,
            &path::join(&self.inner.path, HOSTS),
            address,
            flags,
            self.inner.bus.clone(),
        )
    }
}

impl Detachable for Ring {
    fn detach(&self) {
        self.inner.version.cancel();
        self.inner.updating_to_version.cancel();
        self.inner.hosts.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::wait_until;
    use crate::namespace::MemoryNamespace;

    #[test]
    fn test_ring_names() {
        assert_eq!(ring_name(3), "ring-3");
        assert_eq!(parse_ring_name("ring-3"), Some(3));
        assert_eq!(parse_ring_name("ring-001"), Some(1));
        assert_eq!(parse_ring_name("ring_group_conductor_online"), None);
        assert_eq!(parse_ring_name("host-3"), None);
    }

    fn ring_fixture() -> (NamespaceClient, Ring) {
        let ns = MemoryNamespace::new();
        let client = ns.connect();
        client.ensure_path("/rg").unwrap();
        let ring = Ring::create(&client, "/rg", 1, DataLocationBus::new()).unwrap();
        (client, ring)
    }

    #[test]
    fn test_ring_number_and_versions() {
        let (_client, ring) = ring_fixture();
        assert_eq!(ring.ring_number(), 1);
        assert_eq!(ring.version_number(), None);
        assert!(!ring.is_update_pending());

        ring.set_version_number(4).unwrap();
        wait_until(|| ring.version_number() == Some(4));

        ring.set_updating_to_version_number(5).unwrap();
        wait_until(|| ring.is_update_pending());

        ring.clear_updating_to_version_number().unwrap();
        wait_until(|| !ring.is_update_pending());
    }

    #[test]
    fn test_add_and_find_host() {
        let (_client, ring) = ring_fixture();
        let address = PartitionServerAddress::new("localhost", 42);
        ring.add_host(&address, &[]).unwrap();
        wait_until(|| ring.get_host_by_address(&address).is_some());
        assert_eq!(ring.hosts().len(), 1);

        assert!(matches!(
            ring.add_host(&address, &[]),
            Err(Error::AlreadyExists(_))
        ));
    }
}
