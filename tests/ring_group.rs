//! Ring group behavior: loading, conductor election, data-location events

use hank::common::utils::settle_and_check_not;
use hank::common::wait_until;
use hank::coordinator::{
    Coordinator, HostState, PartitionServerAddress, RingGroup, RingGroupConductorMode,
};
use hank::namespace::{CreateMode, MemoryNamespace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SETTLE_WINDOW: Duration = Duration::from_millis(100);

struct Fixture {
    client: hank::NamespaceClient,
    coordinator: Coordinator,
}

fn fixture() -> Fixture {
    let ns = MemoryNamespace::new();
    let client = ns.connect();
    let coordinator = Coordinator::open(client.clone(), "/hank").unwrap();
    Fixture {
        client,
        coordinator,
    }
}

/// Build myRingGroup over myDomainGroup with rings 1..=3, one host each at
/// localhost:<ring number>.
fn build_ring_group(fixture: &Fixture) -> RingGroup {
    fixture.coordinator.add_domain_group("myDomainGroup").unwrap();
    let ring_group = fixture
        .coordinator
        .add_ring_group("myRingGroup", "myDomainGroup")
        .unwrap();
    for number in 1..=3u32 {
        let ring = ring_group.add_ring(number).unwrap();
        ring.add_host(&PartitionServerAddress::new("localhost", number as u16), &[])
            .unwrap();
    }
    ring_group
}

#[test]
fn test_load() {
    let fixture = fixture();
    let ring_group = build_ring_group(&fixture);

    assert_eq!(ring_group.name(), "myRingGroup");
    assert_eq!(ring_group.domain_group_name(), "myDomainGroup");

    wait_until(|| ring_group.rings().len() == 3);
    wait_until(|| {
        ring_group
            .get_ring_for_host(&PartitionServerAddress::new("localhost", 2))
            .is_some()
    });
    assert_eq!(
        ring_group
            .get_ring_for_host(&PartitionServerAddress::new("localhost", 2))
            .unwrap()
            .ring_number(),
        2
    );
    assert_eq!(ring_group.get_ring(3).unwrap().ring_number(), 3);

    // Every host resolves back to its own ring.
    for ring in ring_group.rings() {
        wait_until(|| !ring.hosts().is_empty());
        for host in ring.hosts() {
            let resolved = ring_group.get_ring_for_host(host.address()).unwrap();
            assert_eq!(resolved.ring_number(), ring.ring_number());
        }
    }
}

#[test]
fn test_data_location_change_listeners() {
    let fixture = fixture();
    let ring_group = build_ring_group(&fixture);
    // Let the whole topology land and its notifications drain before
    // listening, so only the mutations below are observed.
    wait_until(|| ring_group.rings().len() == 3);
    for number in 1..=3 {
        wait_until(|| ring_group.get_ring(number).unwrap().hosts().len() == 1);
    }
    std::thread::sleep(SETTLE_WINDOW);

    let called = Arc::new(AtomicBool::new(false));
    let called_in_listener = Arc::clone(&called);
    ring_group.add_data_location_change_listener(move |_ring_group| {
        called_in_listener.store(true, Ordering::SeqCst);
    });
    assert!(!called.load(Ordering::SeqCst));

    // Delivery is at-least-once; drain stragglers before clearing so the
    // negative assertions below observe true silence.
    let clear = |called: &AtomicBool| {
        std::thread::sleep(SETTLE_WINDOW);
        called.store(false, Ordering::SeqCst);
    };

    // A new host fires.
    let address = PartitionServerAddress::new("localhost", 42);
    let ring = ring_group.get_ring(1).unwrap();
    let host = ring.add_host(&address, &[]).unwrap();
    wait_until(|| called.load(Ordering::SeqCst));
    wait_until(|| ring.get_host_by_address(&address).is_some());
    clear(&called);

    // A new host-domain fires.
    let host_domain = host.add_domain(0).unwrap();
    wait_until(|| called.load(Ordering::SeqCst));
    clear(&called);

    // A new partition on a host that is not serving does not fire.
    let partition = host_domain.add_partition(0).unwrap();
    assert!(settle_and_check_not(
        || called.load(Ordering::SeqCst),
        SETTLE_WINDOW
    ));

    // Toggling deletable does not fire.
    partition.set_deletable(true).unwrap();
    assert!(settle_and_check_not(
        || called.load(Ordering::SeqCst),
        SETTLE_WINDOW
    ));

    // The serving transition fires.
    ring.get_host_by_address(&address)
        .unwrap()
        .set_state(HostState::Serving)
        .unwrap();
    wait_until(|| called.load(Ordering::SeqCst));
}

#[test]
fn test_claim_ring_group_conductor() {
    let fixture = fixture();
    let domain_group = fixture.coordinator.add_domain_group("blah").unwrap();
    domain_group
        .set_domain_versions(&Default::default())
        .unwrap();
    let ring_group = fixture
        .coordinator
        .add_ring_group("myRingGroup", "blah")
        .unwrap();

    // A pre-existing lock node rejects the claim.
    let lock_path = "/hank/ring_groups/myRingGroup/ring_group_conductor_online";
    fixture
        .client
        .create(lock_path, b"", CreateMode::Persistent)
        .unwrap();
    assert!(!ring_group
        .claim_ring_group_conductor(RingGroupConductorMode::Active)
        .unwrap());

    fixture.client.delete(lock_path).unwrap();
    assert!(ring_group
        .claim_ring_group_conductor(RingGroupConductorMode::Active)
        .unwrap());
    assert!(!ring_group
        .claim_ring_group_conductor(RingGroupConductorMode::Active)
        .unwrap());

    ring_group.release_ring_group_conductor().unwrap();
    assert!(ring_group
        .claim_ring_group_conductor(RingGroupConductorMode::Active)
        .unwrap());

    wait_until(|| {
        ring_group.get_ring_group_conductor_mode() == Some(RingGroupConductorMode::Active)
    });
}

#[test]
fn test_conductor_election_concurrency() {
    let ns = MemoryNamespace::new();
    let admin = ns.connect();
    let admin_coordinator = Coordinator::open(admin.clone(), "/hank").unwrap();
    admin_coordinator.add_domain_group("dg").unwrap();
    admin_coordinator.add_ring_group("contested", "dg").unwrap();

    // Two processes, two sessions, racing for the same lock.
    let contenders: Vec<RingGroup> = (0..2)
        .map(|_| {
            let client = ns.connect();
            let coordinator = Coordinator::open(client, "/hank").unwrap();
            wait_until(|| coordinator.get_ring_group("contested").is_some());
            coordinator.get_ring_group("contested").unwrap()
        })
        .collect();

    let outcomes: Vec<bool> = std::thread::scope(|scope| {
        contenders
            .iter()
            .map(|ring_group| {
                scope.spawn(move || {
                    ring_group
                        .claim_ring_group_conductor(RingGroupConductorMode::Active)
                        .unwrap()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_eq!(
        outcomes.iter().filter(|claimed| **claimed).count(),
        1,
        "exactly one contender wins: {outcomes:?}"
    );

    // Both observers converge on the claimed mode.
    for ring_group in &contenders {
        wait_until(|| {
            ring_group.get_ring_group_conductor_mode() == Some(RingGroupConductorMode::Active)
        });
    }
}

#[test]
fn test_session_expiry_releases_conductor() {
    let ns = MemoryNamespace::new();
    let holder_client = ns.connect();
    let holder_coordinator = Coordinator::open(holder_client.clone(), "/hank").unwrap();
    holder_coordinator.add_domain_group("dg").unwrap();
    let held = holder_coordinator.add_ring_group("rg", "dg").unwrap();

    let observer_client = ns.connect();
    let observer_coordinator = Coordinator::open(observer_client, "/hank").unwrap();
    wait_until(|| observer_coordinator.get_ring_group("rg").is_some());
    let observed = observer_coordinator.get_ring_group("rg").unwrap();

    assert!(held
        .claim_ring_group_conductor(RingGroupConductorMode::Idle)
        .unwrap());
    wait_until(|| {
        observed.get_ring_group_conductor_mode() == Some(RingGroupConductorMode::Idle)
    });

    // Holder session dies: the ephemeral lock goes with it.
    holder_client.simulate_session_expiry().unwrap();
    wait_until(|| observed.get_ring_group_conductor_mode().is_none());
    assert!(observed
        .claim_ring_group_conductor(RingGroupConductorMode::Active)
        .unwrap());
}

#[test]
fn test_mode_update_on_held_lock() {
    let fixture = fixture();
    fixture.coordinator.add_domain_group("dg").unwrap();
    let ring_group = fixture.coordinator.add_ring_group("rg", "dg").unwrap();

    assert!(ring_group
        .claim_ring_group_conductor(RingGroupConductorMode::Active)
        .unwrap());
    wait_until(|| {
        ring_group.get_ring_group_conductor_mode() == Some(RingGroupConductorMode::Active)
    });

    ring_group
        .set_ring_group_conductor_mode(RingGroupConductorMode::Idle)
        .unwrap();
    wait_until(|| {
        ring_group.get_ring_group_conductor_mode() == Some(RingGroupConductorMode::Idle)
    });
}
