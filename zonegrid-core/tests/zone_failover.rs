#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use zonegrid_core::cluster::{
    ClusterCoordinator, ClusterEvent, DegradedReason, GridConfig, GridSettings, Member,
    MemberDirectory, MemberId, PartitionMap, QuorumState,
};

const ZONES: [&str; 3] = ["zone-a", "zone-b", "zone-c"];

fn settings(group_type: &str, ip_lists: Vec<String>) -> GridSettings {
    GridConfig {
        partition_group_type: group_type.to_string(),
        partition_group_ip_lists: ip_lists,
        ..GridConfig::default()
    }
    .resolve()
    .unwrap()
}

/// Six members, two per zone, with addresses `10.0.<zone>.<n>`.
fn six_members(directory: &MemberDirectory) -> Vec<Member> {
    let mut members = Vec::new();
    for (zone_idx, zone) in ZONES.iter().enumerate() {
        for n in 1..=2u8 {
            let octet = u8::try_from(zone_idx).unwrap() + 1;
            let member = Member::new(
                SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, octet, n)), 5_701),
                *zone,
            );
            directory.on_member_joined(member.clone());
            members.push(member);
        }
    }
    members
}

fn kill(directory: &MemberDirectory, ids: &[MemberId]) {
    for id in ids {
        directory.on_heartbeat_timeout(id);
        directory.on_heartbeat_timeout(id);
    }
}

fn zone_ids(members: &[Member], zone: &str) -> Vec<MemberId> {
    members
        .iter()
        .filter(|m| m.zone == zone)
        .map(|m| m.id.clone())
        .collect()
}

fn zones_of(map: &PartitionMap, members: &[Member]) -> Vec<BTreeSet<String>> {
    map.partitions()
        .iter()
        .map(|partition| {
            partition
                .members()
                .filter_map(|id| members.iter().find(|m| &m.id == id))
                .map(|m| m.zone.clone())
                .collect()
        })
        .collect()
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<ClusterEvent>) -> Vec<ClusterEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[test]
fn six_members_three_zones_place_every_partition_across_zones() {
    let coordinator = ClusterCoordinator::new(&settings("ZONE_AWARE", Vec::new()));
    let members = six_members(coordinator.directory());

    let report = coordinator.reconcile().unwrap();
    assert_eq!(report.quorum, QuorumState::Quorate);
    assert_eq!(report.degraded, 0);

    let map = coordinator.partition_map();
    assert_eq!(map.partition_count(), 271);
    for zones in zones_of(&map, &members) {
        assert_eq!(zones.len(), 2, "primary and backup must sit in different zones");
    }

    let load = map.load_by_member();
    let (min, max) = (load.values().min().unwrap(), load.values().max().unwrap());
    assert!(max - min <= 2, "load skewed: {load:?}");
}

#[test]
fn losing_one_zone_keeps_every_partition_diverse() {
    let coordinator = ClusterCoordinator::new(&settings("ZONE_AWARE", Vec::new()));
    let members = six_members(coordinator.directory());
    coordinator.reconcile().unwrap();
    let before = coordinator.partition_map();

    let mut events = coordinator.subscribe();
    let lost = zone_ids(&members, "zone-c");
    kill(coordinator.directory(), &lost);
    let report = coordinator.reconcile().unwrap();

    assert_eq!(report.degraded, 0, "two zones remain for every partition");
    assert!(
        drain(&mut events)
            .iter()
            .all(|event| !matches!(event, ClusterEvent::PlacementDegraded(_)))
    );

    let after = coordinator.partition_map();
    for ((old, new), zones) in before
        .partitions()
        .iter()
        .zip(after.partitions())
        .zip(zones_of(&after, &members))
    {
        assert!(lost.iter().all(|id| !new.contains(id)));
        assert_eq!(zones.len(), 2);
        if lost.iter().all(|id| !old.contains(id)) {
            assert_eq!(old, new, "partition {} moved without cause", old.id);
        }
    }
}

#[test]
fn losing_two_zones_degrades_every_partition() {
    let coordinator = ClusterCoordinator::new(&settings("ZONE_AWARE", Vec::new()));
    let members = six_members(coordinator.directory());
    coordinator.reconcile().unwrap();

    let mut events = coordinator.subscribe();
    kill(coordinator.directory(), &zone_ids(&members, "zone-b"));
    kill(coordinator.directory(), &zone_ids(&members, "zone-c"));
    let report = coordinator.reconcile().unwrap();
    assert_eq!(report.quorum, QuorumState::Quorate, "two live members still meet quorum");

    let degraded: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            ClusterEvent::PlacementDegraded(placement) => Some(placement),
            _ => None,
        })
        .collect();
    assert_eq!(degraded.len(), 271);
    assert!(
        degraded
            .iter()
            .all(|placement| placement.reason == DegradedReason::SharedGroup)
    );

    let map = coordinator.partition_map();
    assert!(map.partitions().iter().all(|p| p.members().count() == 2));
    assert_eq!(map.degraded().len(), 271);
}

#[test]
fn custom_interface_groups_act_as_failure_domains() {
    let lists = vec!["10.0.1.*".to_string(), "10.0.2.*,10.0.3.*".to_string()];
    let coordinator = ClusterCoordinator::new(&settings("CUSTOM", lists));
    let members = six_members(coordinator.directory());
    coordinator.reconcile().unwrap();

    let group_of = |id: &MemberId| {
        let member = members.iter().find(|m| &m.id == id).unwrap();
        if member.zone == "zone-a" { 0 } else { 1 }
    };
    for partition in coordinator.partition_map().partitions() {
        let groups: BTreeSet<_> = partition.members().map(group_of).collect();
        assert_eq!(groups.len(), 2, "partition {} not spread across custom groups", partition.id);
    }
}

#[tokio::test]
async fn background_coordinator_follows_failures() {
    let coordinator = Arc::new(ClusterCoordinator::new(&settings("ZONE_AWARE", Vec::new())));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = coordinator.spawn(shutdown_rx);
    tokio::task::yield_now().await;

    let members = six_members(coordinator.directory());
    let lost = zone_ids(&members, "zone-a");
    kill(coordinator.directory(), &lost);
    let target = coordinator.directory().version();

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while coordinator.partition_map().membership_version() < target {
        assert!(tokio::time::Instant::now() < deadline, "map never caught up");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let map = coordinator.partition_map();
    assert!(
        map.partitions()
            .iter()
            .all(|p| lost.iter().all(|id| !p.contains(id)))
    );

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
