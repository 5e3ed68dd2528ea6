//! Ring group façade and conductor election
//!
//! A ring group is one deployment: a set of rings serving the same domain
//! group. Its node payload references the domain group by path. The
//! `ring_group_conductor_online` child is the conductor leader lock: an
//! ephemeral node whose payload is the conductor mode, created to claim and
//! deleted (explicitly or by session expiry) to release.

use crate::common::{Error, Result};
use crate::coordinator::data_location::DataLocationBus;
use crate::coordinator::host::PartitionServerAddress;
use crate::coordinator::ring::{parse_ring_name, Ring};
use crate::namespace::{path, CreateMode, NamespaceClient};
use crate::watch::{Detachable, ListenerHandle, NodeValue, WatchedCell, WatchedDir};
use std::fmt;
use std::sync::Arc;

pub(crate) const RING_GROUP_CONDUCTOR_ONLINE: &str = "ring_group_conductor_online";

/// Conductor mode, persisted as the leader lock's payload by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingGroupConductorMode {
    /// The conductor drives rollouts.
    Active,
    /// The conductor holds the claim but does not initiate work.
    Idle,
}

impl RingGroupConductorMode {
    pub fn name(&self) -> &'static str {
        match self {
            RingGroupConductorMode::Active => "ACTIVE",
            RingGroupConductorMode::Idle => "IDLE",
        }
    }
}

impl fmt::Display for RingGroupConductorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl NodeValue for RingGroupConductorMode {
    fn decode(data: &[u8]) -> Result<Self> {
        match String::decode(data)?.as_str() {
            "ACTIVE" => Ok(RingGroupConductorMode::Active),
            "IDLE" => Ok(RingGroupConductorMode::Idle),
            other => Err(Error::malformed(format!(
                "unknown conductor mode: {other:?}"
            ))),
        }
    }

    fn encode(&self) -> Vec<u8> {
        self.name().as_bytes().to_vec()
    }
}

struct RingGroupInner {
    client: NamespaceClient,
    path: String,
    name: String,
    domain_group_path: String,
    rings: WatchedDir<Ring>,
    conductor: WatchedCell<RingGroupConductorMode>,
    bus: DataLocationBus,
}

/// One deployment of a domain group.
#[derive(Clone)]
pub struct RingGroup {
    inner: Arc<RingGroupInner>,
}

impl RingGroup {
    /// Materialize a ring group referencing `domain_group_path` and attach.
    pub(crate) fn create(
        client: &NamespaceClient,
        ring_groups_root: &str,
        name: &str,
        domain_group_path: &str,
    ) -> Result<RingGroup> {
        let ring_group_path = path::join(ring_groups_root, name);
        client.create(
            &ring_group_path,
            domain_group_path.as_bytes(),
            CreateMode::Persistent,
        )?;
        Self::attach(client.clone(), ring_group_path)
    }

    /// Attach to an existing ring group subtree.
    pub(crate) fn attach(client: NamespaceClient, ring_group_path: String) -> Result<RingGroup> {
        let name = path::name(&ring_group_path).to_string();
        let domain_group_path = client
            .get_string(&ring_group_path)?
            .ok_or_else(|| Error::NotFound(ring_group_path.clone()))?;

        let bus = DataLocationBus::new();
        let factory_client = client.clone();
        let factory_path = ring_group_path.clone();
        let factory_bus = bus.clone();
        let rings = WatchedDir::attach_filtered(
            client.clone(),
            ring_group_path.clone(),
            |child| parse_ring_name(child).is_some(),
            move |child| {
                Ring::attach(
                    factory_client.clone(),
                    path::join(&factory_path, child),
                    factory_bus.clone(),
                )
            },
        )?;
        // Ring membership is a serving-topology contributor.
        let membership_bus = bus.clone();
        rings.subscribe(move || membership_bus.publish());

        let conductor = WatchedCell::attach(
            client.clone(),
            path::join(&ring_group_path, RING_GROUP_CONDUCTOR_ONLINE),
        )?;

        Ok(RingGroup {
            inner: Arc::new(RingGroupInner {
                client,
                path: ring_group_path,
                name,
                domain_group_path,
                rings,
                conductor,
                bus,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Path of the domain group this deployment serves.
    pub fn domain_group_path(&self) -> &str {
        &self.inner.domain_group_path
    }

    pub fn domain_group_name(&self) -> &str {
        path::name(&self.inner.domain_group_path)
    }

    /// Rings in ascending ring-number order.
    pub fn rings(&self) -> Vec<Ring> {
        let mut rings = self.inner.rings.values();
        rings.sort_by_key(Ring::ring_number);
        rings
    }

    pub fn get_ring(&self, ring_number: u32) -> Option<Ring> {
        self.inner
            .rings
            .values()
            .into_iter()
            .find(|ring| ring.ring_number() == ring_number)
    }

    /// The ring containing `address`, if any.
    pub fn get_ring_for_host(&self, address: &PartitionServerAddress) -> Option<Ring> {
        self.inner
            .rings
            .values()
            .into_iter()
            .find(|ring| ring.get_host_by_address(address).is_some())
    }

    pub fn add_ring(&self, ring_number: u32) -> Result<Ring> {
        Ring::create(
            &self.inner.client,
            &self.inner.path,
            ring_number,
            self.inner.bus.clone(),
        )
    }

    // === Conductor election ===

    fn conductor_path(&self) -> String {
        path::join(&self.inner.path, RING_GROUP_CONDUCTOR_ONLINE)
    }

    /// Claim the conductor role by creating the ephemeral leader lock.
    ///
    /// Returns `true` exactly when the lock did not exist at call time; a
    /// concurrent race is arbitrated by the namespace, which admits a single
    /// creation. After a successful claim the caller must still observe its
    /// mode through the watched cell (or an explicit read) before acting as
    /// leader.
    pub fn claim_ring_group_conductor(&self, mode: RingGroupConductorMode) -> Result<bool> {
        match self.inner.client.create(
            &self.conductor_path(),
            &mode.encode(),
            CreateMode::Ephemeral,
        ) {
            Ok(()) => {
                tracing::info!(ring_group = %self.inner.name, %mode, "claimed ring group conductor");
                Ok(true)
            }
            Err(Error::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release the conductor role. Absent lock is silent success.
    pub fn release_ring_group_conductor(&self) -> Result<()> {
        tracing::info!(ring_group = %self.inner.name, "releasing ring group conductor");
        self.inner.client.delete_if_exists(&self.conductor_path())
    }

    /// Last observed conductor mode; `None` while the role is unclaimed.
    pub fn get_ring_group_conductor_mode(&self) -> Option<RingGroupConductorMode> {
        self.inner.conductor.get()
    }

    pub fn is_ring_group_conductor_online(&self) -> bool {
        self.get_ring_group_conductor_mode().is_some()
    }

    /// Update the mode payload on the held lock. Fails with `NotFound` when
    /// the role is unclaimed.
    pub fn set_ring_group_conductor_mode(&self, mode: RingGroupConductorMode) -> Result<()> {
        self.inner.client.set(&self.conductor_path(), &mode.encode())
    }

    /// Observe claim, release, and mode transitions of the conductor lock.
    pub fn add_conductor_mode_listener(
        &self,
        listener: impl Fn(Option<RingGroupConductorMode>) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.inner
            .conductor
            .subscribe(move |mode| listener(mode.copied()))
    }

    pub fn remove_conductor_mode_listener(&self, handle: ListenerHandle) {
        self.inner.conductor.unsubscribe(handle);
    }

    // === Data-location notifications ===

    /// Observe serving-topology changes across the whole ring group: ring
    /// and host membership, host state transitions, host-domain membership.
    pub fn add_data_location_change_listener(
        &self,
        listener: impl Fn(&RingGroup) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let ring_group = self.clone();
        self.inner.bus.subscribe(move || listener(&ring_group))
    }

    pub fn remove_data_location_change_listener(&self, handle: ListenerHandle) {
        self.inner.bus.unsubscribe(handle);
    }
}

impl Detachable for RingGroup {
    fn detach(&self) {
        self.inner.conductor.cancel();
        self.inner.rings.detach();
        self.inner.bus.clear();
    }
}
