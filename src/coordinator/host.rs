//! Host, host-domain, and host-domain-partition façades
//!
//! A host is one partition server, identified by "hostname:port". Its
//! subtree is owned by the server process itself: a state enum under
//! `part_daemon/status`, a flag list, per-domain partition assignments under
//! `domains/<id>/partitions/<n>`, and an opaque `statistics/` area.

use crate::common::{Error, Result};
use crate::coordinator::data_location::DataLocationBus;
use crate::namespace::{path, CreateOp, NamespaceClient};
use crate::watch::{Detachable, ListenerHandle, NodeValue, WatchedCell, WatchedDir};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub(crate) const PART_DAEMON: &str = "part_daemon";
pub(crate) const STATUS: &str = "status";
pub(crate) const FLAGS: &str = "flags";
pub(crate) const DOMAINS: &str = "domains";
pub(crate) const STATISTICS: &str = "statistics";
pub(crate) const PARTITIONS: &str = "partitions";
pub(crate) const CURRENT_VERSION: &str = "current_version";
pub(crate) const DELETABLE: &str = "deletable";

/// Address of a partition server: "hostname:port"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionServerAddress {
    pub host_name: String,
    pub port: u16,
}

impl PartitionServerAddress {
    pub fn new(host_name: impl Into<String>, port: u16) -> Self {
        Self {
            host_name: host_name.into(),
            port,
        }
    }
}

impl fmt::Display for PartitionServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_name, self.port)
    }
}

impl FromStr for PartitionServerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host_name, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::malformed(format!("not a host address: {s:?}")))?;
        if host_name.is_empty() {
            return Err(Error::malformed(format!("empty hostname in {s:?}")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::malformed(format!("bad port in {s:?}")))?;
        Ok(Self::new(host_name, port))
    }
}

/// Partition-server state, persisted under `part_daemon/status` by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Offline,
    Idle,
    Serving,
    Updating,
}

impl HostState {
    pub fn name(&self) -> &'static str {
        match self {
            HostState::Offline => "OFFLINE",
            HostState::Idle => "IDLE",
            HostState::Serving => "SERVING",
            HostState::Updating => "UPDATING",
        }
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl NodeValue for HostState {
    fn decode(data: &[u8]) -> Result<Self> {
        match String::decode(data)?.as_str() {
            "OFFLINE" => Ok(HostState::Offline),
            "IDLE" => Ok(HostState::Idle),
            "SERVING" => Ok(HostState::Serving),
            "UPDATING" => Ok(HostState::Updating),
            other => Err(Error::malformed(format!("unknown host state: {other:?}"))),
        }
    }

    fn encode(&self) -> Vec<u8> {
        self.name().as_bytes().to_vec()
    }
}

struct HostInner {
    client: NamespaceClient,
    path: String,
    address: PartitionServerAddress,
    state: WatchedCell<HostState>,
    flags: WatchedCell<String>,
    domains: WatchedDir<HostDomain>,
}

/// One partition server in a ring.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    /// Materialize the host subtree and attach. Fails with `AlreadyExists`
    /// if a host with this address is already present.
    pub(crate) fn create(
        client: &NamespaceClient,
        hosts_path: &str,
        address: &PartitionServerAddress,
        flags: &[String],
        bus: DataLocationBus,
    ) -> Result<Host> {
        let host_path = path::join(hosts_path, &address.to_string());
        client.create_many(&[
            CreateOp::persistent(host_path.clone(), Vec::new()),
            CreateOp::persistent(path::join(&host_path, PART_DAEMON), Vec::new()),
            CreateOp::persistent(path::join(&host_path, FLAGS), flags.join(",").into_bytes()),
            CreateOp::persistent(path::join(&host_path, DOMAINS), Vec::new()),
            CreateOp::persistent(path::join(&host_path, STATISTICS), Vec::new()),
        ])?;
        Self::attach(client.clone(), host_path, bus)
    }

    /// Attach to an existing host subtree.
    pub(crate) fn attach(
        client: NamespaceClient,
        host_path: String,
        bus: DataLocationBus,
    ) -> Result<Host> {
        let address: PartitionServerAddress = path::name(&host_path).parse()?;
        let state = WatchedCell::attach(
            client.clone(),
            path::join(&path::join(&host_path, PART_DAEMON), STATUS),
        )?;
        let flags = WatchedCell::attach(client.clone(), path::join(&host_path, FLAGS))?;

        let domains_path = path::join(&host_path, DOMAINS);
        let factory_client = client.clone();
        let factory_path = domains_path.clone();
        let domains = WatchedDir::attach(client.clone(), domains_path, move |name| {
            HostDomain::attach(factory_client.clone(), path::join(&factory_path, name))
        })?;

        // Serving-topology contributors: state transitions and host-domain
        // membership. Partition-level events stay local to the host.
        let state_bus = bus.clone();
        state.subscribe(move |_state| state_bus.publish());
        let domains_bus = bus;
        domains.subscribe(move || domains_bus.publish());

        Ok(Host {
            inner: Arc::new(HostInner {
                client,
                path: host_path,
                address,
                state,
                flags,
                domains,
            }),
        })
    }

    pub fn address(&self) -> &PartitionServerAddress {
        &self.inner.address
    }

    /// Last observed state; an absent or unrecognized status reads OFFLINE.
    pub fn state(&self) -> HostState {
        self.inner.state.get().unwrap_or(HostState::Offline)
    }

    pub fn set_state(&self, state: HostState) -> Result<()> {
        self.inner.state.set(&state)
    }

    pub fn flags(&self) -> Vec<String> {
        match self.inner.flags.get() {
            None => Vec::new(),
            Some(joined) if joined.is_empty() => Vec::new(),
            Some(joined) => joined.split(',').map(str::to_string).collect(),
        }
    }

    pub fn domains(&self) -> Vec<HostDomain> {
        self.inner.domains.values()
    }

    pub fn get_domain(&self, domain_id: i32) -> Option<HostDomain> {
        self.inner.domains.get(&domain_id.to_string())
    }

    /// Assign a domain to this host.
    pub fn add_domain(&self, domain_id: i32) -> Result<HostDomain> {
        let domain_path = path::join(
            &path::join(&self.inner.path, DOMAINS),
            &domain_id.to_string(),
        );
        self.inner.client.create_many(&[
            CreateOp::persistent(domain_path.clone(), Vec::new()),
            CreateOp::persistent(path::join(&domain_path, PARTITIONS), Vec::new()),
        ])?;
        HostDomain::attach(self.inner.client.clone(), domain_path)
    }

    /// Observe state transitions of this host.
    pub fn add_state_change_listener(
        &self,
        listener: impl Fn(&Host) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let host = self.clone();
        self.inner
            .state
            .subscribe(move |_state| listener(&host))
    }

    pub fn remove_state_change_listener(&self, handle: ListenerHandle) {
        self.inner.state.unsubscribe(handle);
    }
}

impl Detachable for Host {
    fn detach(&self) {
        self.inner.state.cancel();
        self.inner.flags.cancel();
        self.inner.domains.detach();
    }
}

struct HostDomainInner {
    client: NamespaceClient,
    path: String,
    domain_id: i32,
    partitions: WatchedDir<HostDomainPartition>,
}

/// The set of partitions of one domain assigned to one host.
#[derive(Clone)]
pub struct HostDomain {
    inner: Arc<HostDomainInner>,
}

impl HostDomain {
    pub(crate) fn attach(client: NamespaceClient, domain_path: String) -> Result<HostDomain> {
        let domain_id: i32 = path::name(&domain_path)
            .parse()
            .map_err(|_| Error::malformed("host domain id").at_path(&domain_path))?;
        let partitions_path = path::join(&domain_path, PARTITIONS);
        let factory_client = client.clone();
        let factory_path = partitions_path.clone();
        let partitions = WatchedDir::attach(client.clone(), partitions_path, move |name| {
            HostDomainPartition::attach(factory_client.clone(), path::join(&factory_path, name))
        })?;
        Ok(HostDomain {
            inner: Arc::new(HostDomainInner {
                client,
                path: domain_path,
                domain_id,
                partitions,
            }),
        })
    }

    pub fn domain_id(&self) -> i32 {
        self.inner.domain_id
    }

    pub fn partitions(&self) -> Vec<HostDomainPartition> {
        self.inner.partitions.values()
    }

    pub fn get_partition_by_number(&self, partition_number: i32) -> Option<HostDomainPartition> {
        self.inner.partitions.get(&partition_number.to_string())
    }

    /// Assign one partition, deletable=false and no current version yet.
    pub fn add_partition(&self, partition_number: i32) -> Result<HostDomainPartition> {
        let partition_path = path::join(
            &path::join(&self.inner.path, PARTITIONS),
            &partition_number.to_string(),
        );
        self.inner.client.create_many(&[
            CreateOp::persistent(partition_path.clone(), Vec::new()),
            CreateOp::persistent(path::join(&partition_path, DELETABLE), *b"false"),
        ])?;
        HostDomainPartition::attach(self.inner.client.clone(), partition_path)
    }
}

impl Detachable for HostDomain {
    fn detach(&self) {
        self.inner.partitions.detach();
    }
}

struct HostDomainPartitionInner {
    client: NamespaceClient,
    path: String,
    partition_number: i32,
    current_version: WatchedCell<i32>,
    deletable: WatchedCell<bool>,
}

/// The assignment of one partition of one domain to one host.
#[derive(Clone)]
pub struct HostDomainPartition {
    inner: Arc<HostDomainPartitionInner>,
}

impl HostDomainPartition {
    pub(crate) fn attach(
        client: NamespaceClient,
        partition_path: String,
    ) -> Result<HostDomainPartition> {
        let partition_number: i32 = path::name(&partition_path)
            .parse()
            .map_err(|_| Error::malformed("partition number").at_path(&partition_path))?;
        let current_version =
            WatchedCell::attach(client.clone(), path::join(&partition_path, CURRENT_VERSION))?;
        let deletable =
            WatchedCell::attach(client.clone(), path::join(&partition_path, DELETABLE))?;
        Ok(HostDomainPartition {
            inner: Arc::new(HostDomainPartitionInner {
                client,
                path: partition_path,
                partition_number,
                current_version,
                deletable,
            }),
        })
    }

    pub fn partition_number(&self) -> i32 {
        self.inner.partition_number
    }

    pub fn current_domain_version(&self) -> Option<i32> {
        self.inner.current_version.get()
    }

    pub fn set_current_domain_version(&self, version: i32) -> Result<()> {
        self.inner.current_version.set(&version)
    }

    pub fn deletable(&self) -> bool {
        self.inner.deletable.get().unwrap_or(false)
    }

    /// Soft-flag the assignment for removal. The node itself stays until an
    /// explicit [`delete`](Self::delete).
    pub fn set_deletable(&self, deletable: bool) -> Result<()> {
        self.inner.deletable.set(&deletable)
    }

    /// Remove the assignment from the location graph.
    pub fn delete(&self) -> Result<()> {
        self.inner.client.delete_recursive(&self.inner.path)
    }
}

impl Detachable for HostDomainPartition {
    fn detach(&self) {
        self.inner.current_version.cancel();
        self.inner.deletable.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::wait_until;
    use crate::namespace::MemoryNamespace;

    #[test]
    fn test_address_round_trip() {
        let address: PartitionServerAddress = "node12.example.com:9090".parse().unwrap();
        assert_eq!(address.host_name, "node12.example.com");
        assert_eq!(address.port, 9090);
        assert_eq!(address.to_string(), "node12.example.com:9090");
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!("no-port".parse::<PartitionServerAddress>().is_err());
        assert!(":123".parse::<PartitionServerAddress>().is_err());
        assert!("host:notaport".parse::<PartitionServerAddress>().is_err());
    }

    #[test]
    fn test_host_state_codec() {
        assert_eq!(HostState::decode(b"SERVING").unwrap(), HostState::Serving);
        assert_eq!(HostState::Serving.encode(), b"SERVING");
        assert!(HostState::decode(b"serving").is_err());
        assert!(HostState::decode(b"DANCING").is_err());
    }

    fn host_fixture() -> (NamespaceClient, Host) {
        let ns = MemoryNamespace::new();
        let client = ns.connect();
        client.ensure_path("/hosts").unwrap();
        let host = Host::create(
            &client,
            "/hosts",
            &PartitionServerAddress::new("localhost", 1),
            &["rack=r1".to_string()],
            DataLocationBus::new(),
        )
        .unwrap();
        (client, host)
    }

    #[test]
    fn test_host_defaults() {
        let (_client, host) = host_fixture();
        assert_eq!(host.address().port, 1);
        assert_eq!(host.state(), HostState::Offline);
        assert_eq!(host.flags(), vec!["rack=r1".to_string()]);
        assert!(host.domains().is_empty());
    }

    #[test]
    fn test_host_state_round_trip() {
        let (_client, host) = host_fixture();
        host.set_state(HostState::Serving).unwrap();
        wait_until(|| host.state() == HostState::Serving);
    }

    #[test]
    fn test_add_domain_and_partition() {
        let (_client, host) = host_fixture();
        let host_domain = host.add_domain(0).unwrap();
        assert_eq!(host_domain.domain_id(), 0);

        let partition = host_domain.add_partition(7).unwrap();
        assert_eq!(partition.partition_number(), 7);
        assert!(!partition.deletable());
        assert_eq!(partition.current_domain_version(), None);
        wait_until(|| host_domain.get_partition_by_number(7).is_some());

        partition.set_current_domain_version(3).unwrap();
        wait_until(|| partition.current_domain_version() == Some(3));

        // Two-phase removal: the flag does not remove the node.
        partition.set_deletable(true).unwrap();
        wait_until(|| partition.deletable());
        assert!(host_domain.get_partition_by_number(7).is_some());

        partition.delete().unwrap();
        wait_until(|| host_domain.get_partition_by_number(7).is_none());
    }

    #[test]
    fn test_duplicate_domain_rejected() {
        let (_client, host) = host_fixture();
        host.add_domain(4).unwrap();
        assert!(matches!(
            host.add_domain(4),
            Err(Error::AlreadyExists(_))
        ));
    }
}
