//! Property-based tests for zone-aware placement
//!
//! Replica diversity, reproducibility and stability under no-op churn are
//! checked over randomly sized clusters.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use proptest::prelude::*;
use zonegrid_core::cluster::{
    Member, MemberDirectory, MemberGrouping, MemberState, MembershipSnapshot, PartitionMap,
    ZonePlacementPlanner,
};

#[derive(Debug, Clone)]
struct Layout {
    zones: u8,
    per_zone: u8,
    backups: usize,
    partitions: u32,
}

/// Clusters with at least two zones and at most `zones - 1` backups.
fn layout_strategy() -> impl Strategy<Value = Layout> {
    (2u8..=4, 1u8..=3, 1u32..=96).prop_flat_map(|(zones, per_zone, partitions)| {
        (0..usize::from(zones)).prop_map(move |backups| Layout {
            zones,
            per_zone,
            backups,
            partitions,
        })
    })
}

fn members(layout: &Layout) -> Vec<Member> {
    let mut members = Vec::new();
    for zone in 0..layout.zones {
        for idx in 0..layout.per_zone {
            members.push(Member::new(
                SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, zone, idx + 1)), 5_701),
                format!("zone-{zone}"),
            ));
        }
    }
    members
}

fn planner(layout: &Layout) -> ZonePlacementPlanner {
    ZonePlacementPlanner::with_grouping(MemberGrouping::zone_aware(), layout.backups)
}

fn assert_diverse(snapshot: &MembershipSnapshot, map: &PartitionMap) -> Result<(), TestCaseError> {
    for partition in map.partitions() {
        let zones: Vec<&str> = partition
            .members()
            .map(|id| snapshot.get(id).map_or("?", |m| m.zone.as_str()))
            .collect();
        let distinct: BTreeSet<&str> = zones.iter().copied().collect();
        prop_assert_eq!(zones.len(), map.backup_count() + 1, "partition {} not full", partition.id);
        prop_assert_eq!(distinct.len(), zones.len(), "partition {} shares a zone", partition.id);
        prop_assert!(partition.is_diverse());
    }
    Ok(())
}

proptest! {
    #[test]
    fn replicas_occupy_distinct_zones(layout in layout_strategy()) {
        let snapshot = MembershipSnapshot::new(1, members(&layout));
        let outcome = planner(&layout).plan(&snapshot, &PartitionMap::new(layout.partitions, layout.backups));
        prop_assert!(outcome.degraded.is_empty());
        assert_diverse(&snapshot, &outcome.map)?;
    }

    #[test]
    fn diversity_survives_a_member_failure(layout in layout_strategy(), victim in any::<prop::sample::Index>()) {
        let mut view = members(&layout);
        let planner = planner(&layout);
        let first = planner.plan(
            &MembershipSnapshot::new(1, view.clone()),
            &PartitionMap::new(layout.partitions, layout.backups),
        );

        let victim = victim.index(view.len());
        view[victim].state = MemberState::Dead;
        let after = MembershipSnapshot::new(2, view);
        let live_zones: BTreeSet<&str> = after.alive().map(|m| m.zone.as_str()).collect();
        prop_assume!(live_zones.len() > layout.backups);

        let second = planner.plan(&after, &first.map);
        assert_diverse(&after, &second.map)?;
        for (before, now) in first.map.partitions().iter().zip(second.map.partitions()) {
            let held_victim = before.members().any(|id| after.get(id).is_some_and(|m| m.state == MemberState::Dead));
            if !held_victim {
                prop_assert_eq!(before, now, "untouched partition {} moved", before.id);
            }
        }
    }

    #[test]
    fn planning_is_reproducible(layout in layout_strategy()) {
        let mut shuffled = members(&layout);
        shuffled.reverse();
        let prior = PartitionMap::new(layout.partitions, layout.backups);

        let first = planner(&layout).plan(&MembershipSnapshot::new(4, members(&layout)), &prior);
        let second = planner(&layout).plan(&MembershipSnapshot::new(4, shuffled), &prior);
        prop_assert_eq!(first.map, second.map);
        prop_assert_eq!(first.moves, second.moves);
    }

    #[test]
    fn readding_an_unchanged_membership_moves_nothing(layout in layout_strategy()) {
        let directory = MemberDirectory::new();
        let roster = members(&layout);
        for member in &roster {
            directory.on_member_joined(member.clone());
        }
        let planner = planner(&layout);
        let planned = planner.plan(
            &directory.snapshot(),
            &PartitionMap::new(layout.partitions, layout.backups),
        );

        for member in &roster {
            directory.on_member_left(&member.id);
        }
        for member in &roster {
            directory.on_member_joined(member.clone());
        }
        let replanned = planner.plan(&directory.snapshot(), &planned.map);
        prop_assert!(replanned.moves.is_empty());
        prop_assert_eq!(replanned.map.version(), planned.map.version());
        prop_assert_eq!(replanned.map.membership_version(), directory.version());
    }
}
