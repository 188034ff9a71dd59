use std::collections::BTreeMap;

use anyhow::{Context, Result, ensure};
use tracing::info;
use zonegrid_core::cluster::{
    ClusterCoordinator, DegradedReason, DiscoveryFeed, FailureListener, GridSettings, GroupKey,
    MemberId, MemberState, PartitionId, QuorumState, ReconcileReport, SeedMember,
    StaticDiscovery,
};

use crate::config::Roster;

const MAX_LISTED_DEGRADED: usize = 10;

/// Load and placement figures after one reconcile pass.
#[derive(Debug, Clone)]
pub struct PlanSummary {
    /// Membership version planned against.
    pub membership_version: u64,
    /// Installed map version.
    pub map_version: u64,
    /// Partition count.
    pub partitions: u32,
    /// Replica slots per partition.
    pub replicas: usize,
    /// Quorum state after the pass.
    pub quorum: QuorumState,
    /// Slots that changed holder in the pass.
    pub moves: usize,
    /// Replica slots held per member group, with the group's live member count.
    pub group_load: BTreeMap<GroupKey, (usize, usize)>,
    /// Partitions currently degraded.
    pub degraded: Vec<(PartitionId, DegradedReason)>,
}

impl PlanSummary {
    fn capture(coordinator: &ClusterCoordinator, report: &ReconcileReport) -> Self {
        let snapshot = coordinator.directory().snapshot();
        let map = coordinator.partition_map();
        let grouping = coordinator.planner().grouping();
        let slots = map.load_by_group(&snapshot, grouping);
        let group_load: BTreeMap<GroupKey, (usize, usize)> = grouping
            .groups(snapshot.members().iter().filter(|m| m.state != MemberState::Dead))
            .into_iter()
            .map(|(group, members)| {
                let held = slots.get(&group).copied().unwrap_or(0);
                (group, (held, members.len()))
            })
            .collect();

        Self {
            membership_version: report.membership_version,
            map_version: report.map_version,
            partitions: map.partition_count(),
            replicas: map.backup_count() + 1,
            quorum: report.quorum,
            moves: report.moves,
            group_load,
            degraded: map.degraded(),
        }
    }

    /// Printable report lines.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![
            format!(
                "membership v{} map v{}: {} partitions x {} replicas, {}",
                self.membership_version,
                self.map_version,
                self.partitions,
                self.replicas,
                self.quorum
            ),
            format!("moves: {}", self.moves),
        ];
        for (group, (slots, members)) in &self.group_load {
            lines.push(format!("group {group}: {slots} slots across {members} members"));
        }
        if self.degraded.is_empty() {
            lines.push("degraded: none".to_string());
        } else {
            let listed: Vec<String> = self
                .degraded
                .iter()
                .take(MAX_LISTED_DEGRADED)
                .map(|(partition, reason)| format!("{partition} ({reason})"))
                .collect();
            let more = self.degraded.len().saturating_sub(MAX_LISTED_DEGRADED);
            let suffix = if more > 0 {
                format!(", +{more} more")
            } else {
                String::new()
            };
            lines.push(format!(
                "degraded: {} partitions: {}{suffix}",
                self.degraded.len(),
                listed.join(", ")
            ));
        }
        lines
    }
}

/// Placement before and after an injected zone failure.
#[derive(Debug, Clone)]
pub struct SimulationSummary {
    /// Placement with every member alive.
    pub before: PlanSummary,
    /// Members declared dead by the simulation.
    pub killed: Vec<MemberId>,
    /// Placement after the failure, when one was requested.
    pub after: Option<PlanSummary>,
}

async fn announce(settings: &GridSettings, seeds: &[SeedMember]) -> Result<ClusterCoordinator> {
    let discovery = StaticDiscovery::new(seeds).context("roster contains an invalid member")?;
    let coordinator = ClusterCoordinator::new(settings);
    let mut feed = DiscoveryFeed::new(Box::new(discovery));
    let delta = feed.refresh(coordinator.directory().as_ref()).await?;
    info!(members = delta.joined.len(), "members announced");
    Ok(coordinator)
}

/// Plan placement for the members of a roster.
pub async fn plan_roster(settings: &GridSettings, roster: &Roster) -> Result<PlanSummary> {
    let coordinator = announce(settings, &roster.members).await?;
    let report = coordinator.reconcile()?;
    Ok(PlanSummary::capture(&coordinator, &report))
}

/// Zone label used for the `index`-th synthetic zone (`zone-a`, `zone-b`, ...).
#[must_use]
pub fn zone_name(index: u8) -> String {
    format!("zone-{}", char::from(b'a' + index % 26))
}

/// Synthetic members, `per_zone` in each of `zones` zones.
pub fn synthetic_members(zones: u8, per_zone: u8) -> Result<Vec<SeedMember>> {
    ensure!((1..=26).contains(&zones), "zones must be between 1 and 26");
    ensure!(
        (1..=254).contains(&per_zone),
        "members per zone must be between 1 and 254"
    );
    let mut seeds = Vec::with_capacity(usize::from(zones) * usize::from(per_zone));
    for zone in 0..zones {
        for idx in 1..=per_zone {
            seeds.push(SeedMember {
                id: None,
                zone: zone_name(zone),
                address: format!("10.0.{}.{idx}:5701", zone + 1),
            });
        }
    }
    Ok(seeds)
}

/// Place a synthetic cluster, then optionally fail every member of one zone.
pub async fn simulate(
    settings: &GridSettings,
    zones: u8,
    per_zone: u8,
    kill_zone: Option<&str>,
) -> Result<SimulationSummary> {
    let seeds = synthetic_members(zones, per_zone)?;
    let coordinator = announce(settings, &seeds).await?;
    let before = PlanSummary::capture(&coordinator, &coordinator.reconcile()?);

    let Some(zone) = kill_zone else {
        return Ok(SimulationSummary {
            before,
            killed: Vec::new(),
            after: None,
        });
    };

    let killed: Vec<MemberId> = coordinator
        .directory()
        .snapshot()
        .members()
        .iter()
        .filter(|member| member.zone == zone)
        .map(|member| member.id.clone())
        .collect();
    ensure!(!killed.is_empty(), "no members in zone '{zone}'");

    let directory = coordinator.directory();
    for id in &killed {
        // suspect, then dead
        directory.heartbeat_timeout(id);
        directory.heartbeat_timeout(id);
    }
    info!(zone, members = killed.len(), "zone failed");

    let after = PlanSummary::capture(&coordinator, &coordinator.reconcile()?);
    Ok(SimulationSummary {
        before,
        killed,
        after: Some(after),
    })
}
