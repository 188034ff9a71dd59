use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::config::GridSettings;
use super::error::{ClusterError, DegradedReason};
use super::grouping::{GroupKey, MemberGrouping};
use super::membership::{Member, MemberId, MembershipSnapshot};
use super::partition::{Partition, PartitionId, PartitionMap, SlotMove};

/// A partition the planner could not place with full group diversity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegradedPlacement {
    /// Affected partition.
    pub partition: PartitionId,
    /// What prevented a diverse placement.
    pub reason: DegradedReason,
}

impl From<DegradedPlacement> for ClusterError {
    fn from(value: DegradedPlacement) -> Self {
        Self::PlacementDegraded {
            partition: value.partition,
            reason: value.reason,
        }
    }
}

/// Result of one planning pass.
#[derive(Debug, Clone)]
pub struct PlacementOutcome {
    /// The planned map. Equal to the prior map (same version) when nothing moved.
    pub map: PartitionMap,
    /// Slot changes relative to the prior map.
    pub moves: Vec<SlotMove>,
    /// Partitions whose placement became (or changed while) degraded in this pass.
    pub degraded: Vec<DegradedPlacement>,
}

impl PlacementOutcome {
    /// Returns `true` when the pass changed no slot.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.moves.is_empty()
    }
}

#[derive(Default)]
struct Load {
    groups: BTreeMap<GroupKey, usize>,
    members: BTreeMap<MemberId, usize>,
}

impl Load {
    fn add(&mut self, member: &MemberId, group: &GroupKey) {
        *self.groups.entry(group.clone()).or_insert(0) += 1;
        *self.members.entry(member.clone()).or_insert(0) += 1;
    }

    fn group(&self, group: &GroupKey) -> usize {
        self.groups.get(group).copied().unwrap_or(0)
    }

    fn member(&self, member: &MemberId) -> usize {
        self.members.get(member).copied().unwrap_or(0)
    }
}

/// Computes zone-diverse partition assignments from membership snapshots.
///
/// Planning is a pure function of `(snapshot, prior map)`: the same inputs
/// always produce the same map, and replicas whose holder is still live are
/// never moved unless a group the partition does not use yet can take them.
#[derive(Debug, Clone)]
pub struct ZonePlacementPlanner {
    grouping: MemberGrouping,
    backup_count: usize,
}

impl ZonePlacementPlanner {
    /// Create a planner from resolved settings.
    #[must_use]
    pub fn new(settings: &GridSettings) -> Self {
        Self::with_grouping(settings.grouping.clone(), settings.backup_count)
    }

    /// Create a planner with an explicit grouping rule.
    #[must_use]
    pub const fn with_grouping(grouping: MemberGrouping, backup_count: usize) -> Self {
        Self {
            grouping,
            backup_count,
        }
    }

    /// Grouping rule used to derive failure domains.
    #[must_use]
    pub const fn grouping(&self) -> &MemberGrouping {
        &self.grouping
    }

    /// Plan a successor of `prior` for the members in `snapshot`.
    #[must_use]
    pub fn plan(&self, snapshot: &MembershipSnapshot, prior: &PartitionMap) -> PlacementOutcome {
        let width = self.backup_count + 1;
        let groups: BTreeMap<&MemberId, GroupKey> = snapshot
            .members()
            .iter()
            .map(|member| (&member.id, self.grouping.group_of(member)))
            .collect();
        let eligible: Vec<&Member> = snapshot.alive().collect();
        let eligible_groups: BTreeSet<&GroupKey> = eligible
            .iter()
            .filter_map(|member| groups.get(&member.id))
            .collect();

        let mut load = Load::default();
        let mut retained = Vec::with_capacity(prior.partitions().len());
        for partition in prior.partitions() {
            let kept = Self::retain_replicas(partition, snapshot, &groups, &eligible_groups, width);
            for member in &kept {
                load.add(member, &groups[member]);
            }
            retained.push(kept);
        }

        let mut partitions = Vec::with_capacity(retained.len());
        let mut degraded = Vec::new();
        for (previous, mut kept) in prior.partitions().iter().zip(retained) {
            let mut used: BTreeSet<GroupKey> =
                kept.iter().map(|member| groups[member].clone()).collect();
            let mut reason = (used.len() < kept.len()).then_some(DegradedReason::SharedGroup);

            while kept.len() < width {
                let Some((member, diverse)) = Self::pick(&eligible, &groups, &load, &used, &kept)
                else {
                    reason = Some(DegradedReason::UnderReplicated);
                    break;
                };
                if !diverse && reason.is_none() {
                    reason = Some(DegradedReason::SharedGroup);
                }
                let group = &groups[&member.id];
                load.add(&member.id, group);
                used.insert(group.clone());
                kept.push(member.id.clone());
            }

            let mut replicas: Vec<Option<MemberId>> = kept.into_iter().map(Some).collect();
            replicas.resize(width, None);
            let next = Partition {
                id: previous.id,
                replicas,
                degraded: reason,
            };
            if let Some(reason) = reason
                && next != *previous
            {
                debug!(partition = %next.id, %reason, "partition placed without full diversity");
                degraded.push(DegradedPlacement {
                    partition: next.id,
                    reason,
                });
            }
            partitions.push(next);
        }

        let changed = partitions.as_slice() != prior.partitions();
        let version = if changed {
            prior.version() + 1
        } else {
            prior.version()
        };
        let map = PartitionMap::from_parts(
            version,
            snapshot.version(),
            self.backup_count,
            partitions,
        );
        let moves = map.reassignments_from(prior);

        if !degraded.is_empty() {
            warn!(
                partitions = degraded.len(),
                groups = eligible_groups.len(),
                replicas = width,
                "placement degraded; falling back to non-diverse replicas"
            );
        }
        debug!(
            membership_version = snapshot.version(),
            map_version = map.version(),
            moves = moves.len(),
            "placement pass complete"
        );

        PlacementOutcome {
            map,
            moves,
            degraded,
        }
    }

    /// Replicas of `partition` that survive this pass, compacted toward the primary slot.
    fn retain_replicas(
        partition: &Partition,
        snapshot: &MembershipSnapshot,
        groups: &BTreeMap<&MemberId, GroupKey>,
        eligible_groups: &BTreeSet<&GroupKey>,
        width: usize,
    ) -> Vec<MemberId> {
        let mut kept: Vec<MemberId> = Vec::with_capacity(width);
        for member in partition.members() {
            let live = snapshot
                .get(member)
                .is_some_and(|record| record.state.is_live());
            if live && !kept.contains(member) {
                kept.push(member.clone());
            }
        }
        kept.truncate(width);

        // Release replicas that share a group with an earlier slot, but only as
        // many as there are unused groups able to take them.
        let kept_groups: BTreeSet<&GroupKey> = kept.iter().map(|member| &groups[member]).collect();
        let spare = eligible_groups
            .iter()
            .filter(|group| !kept_groups.contains(*group))
            .count();
        if spare == 0 {
            return kept;
        }
        let mut seen = BTreeSet::new();
        let duplicates: Vec<usize> = kept
            .iter()
            .enumerate()
            .filter(|(_, member)| !seen.insert(&groups[*member]))
            .map(|(index, _)| index)
            .collect();
        let release: BTreeSet<usize> = duplicates.into_iter().rev().take(spare).collect();
        kept.into_iter()
            .enumerate()
            .filter(|(index, _)| !release.contains(index))
            .map(|(_, member)| member)
            .collect()
    }

    /// Least-loaded eligible member for the next slot; the flag reports group diversity.
    fn pick<'m>(
        eligible: &[&'m Member],
        groups: &BTreeMap<&MemberId, GroupKey>,
        load: &Load,
        used: &BTreeSet<GroupKey>,
        taken: &[MemberId],
    ) -> Option<(&'m Member, bool)> {
        let rank = |member: &'m Member| {
            (
                load.group(&groups[&member.id]),
                load.member(&member.id),
                &member.id,
            )
        };
        let candidates = move || {
            eligible
                .iter()
                .copied()
                .filter(move |member| !taken.contains(&member.id))
        };

        candidates()
            .filter(|member| !used.contains(&groups[&member.id]))
            .min_by_key(|member| rank(*member))
            .map(|member| (member, true))
            .or_else(|| {
                candidates()
                    .min_by_key(|member| rank(*member))
                    .map(|member| (member, false))
            })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use super::*;
    use crate::cluster::membership::MemberState;

    fn member(zone: u8, idx: u8) -> Member {
        Member::new(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, zone, idx)), 5_701),
            format!("zone-{zone}"),
        )
    }

    fn snapshot(version: u64, members: Vec<Member>) -> MembershipSnapshot {
        MembershipSnapshot::new(version, members)
    }

    fn planner(backups: usize) -> ZonePlacementPlanner {
        ZonePlacementPlanner::with_grouping(MemberGrouping::zone_aware(), backups)
    }

    fn zone_of<'a>(snapshot: &'a MembershipSnapshot, id: &MemberId) -> &'a str {
        &snapshot.get(id).unwrap().zone
    }

    #[test]
    fn fills_empty_map_across_zones() {
        let members = vec![member(1, 1), member(1, 2), member(2, 1), member(2, 2)];
        let snapshot = snapshot(1, members);
        let outcome = planner(1).plan(&snapshot, &PartitionMap::new(32, 1));

        assert!(outcome.degraded.is_empty());
        assert_eq!(outcome.map.version(), 1);
        for partition in outcome.map.partitions() {
            let zones: Vec<_> = partition.members().map(|id| zone_of(&snapshot, id)).collect();
            assert_eq!(zones.len(), 2);
            assert_ne!(zones[0], zones[1]);
        }
        let load = outcome.map.load_by_member();
        assert!(load.values().all(|count| *count == 16), "{load:?}");
    }

    #[test]
    fn unchanged_input_keeps_map_and_version() {
        let snapshot = snapshot(1, vec![member(1, 1), member(2, 1), member(3, 1)]);
        let planner = planner(1);
        let first = planner.plan(&snapshot, &PartitionMap::new(16, 1));
        let second = planner.plan(&snapshot, &first.map);
        assert!(second.is_unchanged());
        assert_eq!(second.map.version(), first.map.version());
        assert_eq!(second.map.partitions(), first.map.partitions());
    }

    #[test]
    fn surviving_backup_is_promoted() {
        let members = vec![member(1, 1), member(2, 1), member(3, 1)];
        let planner = planner(1);
        let first = planner.plan(&snapshot(1, members.clone()), &PartitionMap::new(9, 1));

        let victim = members[0].id.clone();
        let mut after = members;
        after[0].state = MemberState::Dead;
        let second = planner.plan(&snapshot(2, after), &first.map);

        for (before, now) in first.map.partitions().iter().zip(second.map.partitions()) {
            assert!(!now.contains(&victim));
            if before.primary() == Some(&victim) {
                let backup = before.backups().next().unwrap();
                assert_eq!(now.primary(), Some(backup), "backup takes over the primary slot");
            } else if !before.contains(&victim) {
                assert_eq!(before, now, "untouched partitions stay put");
            }
        }
        assert!(second.degraded.is_empty());
    }

    #[test]
    fn single_zone_degrades_instead_of_failing() {
        let snapshot = snapshot(1, vec![member(1, 1), member(1, 2)]);
        let outcome = planner(1).plan(&snapshot, &PartitionMap::new(4, 1));
        assert_eq!(outcome.degraded.len(), 4);
        assert!(
            outcome
                .degraded
                .iter()
                .all(|d| d.reason == DegradedReason::SharedGroup)
        );
        assert!(
            outcome
                .map
                .partitions()
                .iter()
                .all(|p| p.members().count() == 2)
        );

        let again = planner(1).plan(&snapshot, &outcome.map);
        assert!(again.degraded.is_empty(), "stable degradation is reported once");
    }

    #[test]
    fn too_few_members_leaves_slots_empty() {
        let snapshot = snapshot(1, vec![member(1, 1)]);
        let outcome = planner(2).plan(&snapshot, &PartitionMap::new(3, 2));
        for partition in outcome.map.partitions() {
            assert_eq!(partition.members().count(), 1);
            assert_eq!(partition.degraded, Some(DegradedReason::UnderReplicated));
        }
    }

    #[test]
    fn suspect_members_keep_replicas_but_get_no_new_ones() {
        let members = vec![member(1, 1), member(2, 1), member(3, 1)];
        let planner = planner(1);
        let first = planner.plan(&snapshot(1, members.clone()), &PartitionMap::new(12, 1));

        let mut after = members.clone();
        after[1].state = MemberState::Suspect;
        let second = planner.plan(&snapshot(2, after.clone()), &first.map);
        assert!(second.is_unchanged());

        let wider = ZonePlacementPlanner::with_grouping(MemberGrouping::zone_aware(), 2)
            .plan(&snapshot(3, after), &first.map);
        for partition in wider.map.partitions() {
            if let Some(fresh) = partition.replicas[2].as_ref() {
                assert_ne!(fresh, &members[1].id);
            }
        }
    }

    #[test]
    fn new_zone_repairs_shared_placements() {
        let planner = planner(1);
        let one_zone = vec![member(1, 1), member(1, 2)];
        let first = planner.plan(&snapshot(1, one_zone.clone()), &PartitionMap::new(6, 1));
        assert_eq!(first.degraded.len(), 6);

        let mut two_zones = one_zone;
        two_zones.push(member(2, 1));
        let second_snapshot = snapshot(2, two_zones);
        let second = planner.plan(&second_snapshot, &first.map);
        for (before, after) in first.map.partitions().iter().zip(second.map.partitions()) {
            assert!(after.is_diverse());
            assert_eq!(before.primary(), after.primary(), "primary stays in place");
        }
    }

    #[test]
    fn backup_count_growth_adds_slots() {
        let members = vec![member(1, 1), member(2, 1), member(3, 1)];
        let snapshot = snapshot(1, members);
        let first = planner(1).plan(&snapshot, &PartitionMap::new(5, 1));
        let second = planner(2).plan(&snapshot, &first.map);
        assert_eq!(second.map.backup_count(), 2);
        for partition in second.map.partitions() {
            let zones: BTreeSet<_> = partition.members().map(|id| zone_of(&snapshot, id)).collect();
            assert_eq!(zones.len(), 3);
        }
    }
}
