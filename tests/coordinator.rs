//! Coordinator loading over a seeded namespace, plus round-trip laws

use hank::common::wait_until;
use hank::coordinator::{Coordinator, HostState, PartitionServerAddress};
use hank::namespace::{CreateMode, MemoryNamespace, NamespaceClient};
use std::collections::BTreeMap;

/// Seed the tree the way an administrator and a partition server would have
/// left it: one domain, one domain group, one ring group with one ring and
/// one idle host.
fn seed(client: &NamespaceClient) {
    client.ensure_path("/hank/domains/domain0/versions").unwrap();
    client.create_int("/hank/domains/domain0/num_parts", 2).unwrap();
    client
        .create(
            "/hank/domains/domain0/storage_engine_factory_class",
            b"cueball",
            CreateMode::Persistent,
        )
        .unwrap();
    client
        .create(
            "/hank/domains/domain0/storage_engine_options",
            b"",
            CreateMode::Persistent,
        )
        .unwrap();

    client
        .ensure_path("/hank/domain_groups/myDomainGroup/domains")
        .unwrap();
    client
        .ensure_path("/hank/domain_groups/myDomainGroup/versions")
        .unwrap();

    client.ensure_path("/hank/ring_groups").unwrap();
    client
        .create(
            "/hank/ring_groups/myRingGroup",
            b"/hank/domain_groups/myDomainGroup",
            CreateMode::Persistent,
        )
        .unwrap();
    client
        .ensure_path("/hank/ring_groups/myRingGroup/ring-001/hosts")
        .unwrap();
    client
        .create_int("/hank/ring_groups/myRingGroup/ring-001/version", 1)
        .unwrap();

    let host = "/hank/ring_groups/myRingGroup/ring-001/hosts/localhost:1";
    client.ensure_path(&format!("{host}/part_daemon")).unwrap();
    client
        .create(
            &format!("{host}/part_daemon/status"),
            b"IDLE",
            CreateMode::Persistent,
        )
        .unwrap();
    client
        .create(&format!("{host}/flags"), b"", CreateMode::Persistent)
        .unwrap();
    client.ensure_path(&format!("{host}/domains")).unwrap();
    client.ensure_path(&format!("{host}/statistics")).unwrap();
}

#[test]
fn test_load_seeded_tree() {
    let ns = MemoryNamespace::new();
    let client = ns.connect();
    seed(&client);

    let coordinator = Coordinator::open(client, "/hank").unwrap();

    assert_eq!(coordinator.get_domains().len(), 1);
    assert_eq!(coordinator.get_domain("domain0").unwrap().name(), "domain0");
    assert_eq!(coordinator.get_domain("domain0").unwrap().num_partitions(), 2);

    assert_eq!(coordinator.get_domain_groups().len(), 1);
    assert_eq!(
        coordinator.get_domain_group("myDomainGroup").unwrap().name(),
        "myDomainGroup"
    );

    assert_eq!(coordinator.get_ring_groups().len(), 1);
    let ring_group = coordinator.get_ring_group("myRingGroup").unwrap();
    assert_eq!(ring_group.name(), "myRingGroup");
    assert_eq!(ring_group.domain_group_name(), "myDomainGroup");

    // Zero-padded ring names parse to their ring number.
    let ring = ring_group.get_ring(1).unwrap();
    assert_eq!(ring.ring_number(), 1);
    assert_eq!(ring.version_number(), Some(1));

    let host = ring
        .get_host_by_address(&PartitionServerAddress::new("localhost", 1))
        .unwrap();
    assert_eq!(host.state(), HostState::Idle);
}

#[test]
fn test_domain_group_version_pinning_round_trip() {
    let ns = MemoryNamespace::new();
    let client = ns.connect();
    let coordinator = Coordinator::open(client, "/hank").unwrap();

    coordinator.add_domain("users", 16, "cueball", "").unwrap();
    coordinator.add_domain("items", 16, "cueball", "").unwrap();
    let group = coordinator.add_domain_group("frontend").unwrap();

    let mut pinned = BTreeMap::new();
    pinned.insert("users".to_string(), 2);
    pinned.insert("items".to_string(), 5);
    let created = group.set_domain_versions(&pinned).unwrap();
    wait_until(|| group.domains().len() == 2);

    let fetched = group.get_version_by_number(created.version_number()).unwrap();
    let by_id = fetched.domain_versions();

    // Translate ids back to names and compare against the input pinning.
    let by_name: BTreeMap<String, i32> = by_id
        .iter()
        .map(|(id, version)| (group.domain_name_by_id(*id).unwrap(), *version))
        .collect();
    assert_eq!(by_name, pinned);
}

#[test]
fn test_recursive_delete_leaves_no_descendants() {
    let ns = MemoryNamespace::new();
    let client = ns.connect();
    let coordinator = Coordinator::open(client.clone(), "/hank").unwrap();

    let domain = coordinator.add_domain("doomed", 4, "cueball", "").unwrap();
    domain.open_version().unwrap();
    domain.open_version().unwrap();

    assert!(coordinator.delete_domain("doomed").unwrap());
    assert!(!client.exists("/hank/domains/doomed").unwrap());
    assert!(!client.exists("/hank/domains/doomed/versions").unwrap());
    assert!(!client.exists("/hank/domains/doomed/versions/0").unwrap());
    assert!(!client.exists("/hank/domains/doomed/num_parts").unwrap());
}

#[test]
fn test_typed_cell_round_trip_laws() {
    let ns = MemoryNamespace::new();
    let client = ns.connect();
    let coordinator = Coordinator::open(client.clone(), "/hank").unwrap();

    let domain = coordinator.add_domain("laws", 4, "cueball", "").unwrap();
    let version = domain.open_version().unwrap();

    // set then eventually get == v.
    version.set_total_num_bytes(12_345).unwrap();
    wait_until(|| version.total_num_bytes() == Some(12_345));
    version.set_total_num_records(678).unwrap();
    wait_until(|| version.total_num_records() == Some(678));

    // delete then eventually absent.
    client
        .delete("/hank/domains/laws/versions/0/total_num_bytes")
        .unwrap();
    wait_until(|| version.total_num_bytes().is_none());
    assert_eq!(
        client
            .get_long_or_null("/hank/domains/laws/versions/0/total_num_bytes")
            .unwrap(),
        None
    );
}

#[test]
fn test_two_observers_converge() {
    let ns = MemoryNamespace::new();
    let writer_client = ns.connect();
    let writer = Coordinator::open(writer_client, "/hank").unwrap();

    let reader_client = ns.connect();
    let reader = Coordinator::open(reader_client, "/hank").unwrap();

    writer.add_domain("shared", 8, "cueball", "").unwrap();
    wait_until(|| reader.get_domain("shared").is_some());
    assert_eq!(reader.get_domain("shared").unwrap().num_partitions(), 8);

    writer.delete_domain("shared").unwrap();
    wait_until(|| reader.get_domain("shared").is_none());
}
