use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::error::ClusterError;

/// Stable member identifier, conventionally `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    /// Wrap an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<SocketAddr> for MemberId {
    fn from(value: SocketAddr) -> Self {
        Self(value.to_string())
    }
}

/// Liveness of a member as reported by the failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    /// Member is healthy.
    Alive,
    /// Member missed a heartbeat and is under suspicion.
    Suspect,
    /// Member missed heartbeats past suspicion and is treated as failed.
    Dead,
}

impl MemberState {
    /// Members that still count toward quorum and may keep existing replicas.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Alive | Self::Suspect)
    }
}

/// A cluster member with its placement metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Stable identifier.
    pub id: MemberId,
    /// Address the member advertises.
    pub address: SocketAddr,
    /// Zone label supplied by discovery.
    pub zone: String,
    /// Current liveness.
    pub state: MemberState,
    /// When the member (last) joined.
    pub joined_at: DateTime<Utc>,
}

impl Member {
    /// Create an alive member that joined now, identified by its address.
    pub fn new(address: SocketAddr, zone: impl Into<String>) -> Self {
        Self::with_id(MemberId::from(address), address, zone)
    }

    /// Create an alive member with an explicit identifier.
    pub fn with_id(id: MemberId, address: SocketAddr, zone: impl Into<String>) -> Self {
        Self {
            id,
            address,
            zone: zone.into(),
            state: MemberState::Alive,
            joined_at: Utc::now(),
        }
    }
}

/// Immutable view of the directory at one membership version.
#[derive(Debug, Clone)]
pub struct MembershipSnapshot {
    version: u64,
    members: Arc<[Member]>,
}

impl MembershipSnapshot {
    /// Build a snapshot from explicit members (sorted by id).
    #[must_use]
    pub fn new(version: u64, mut members: Vec<Member>) -> Self {
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members.dedup_by(|a, b| a.id == b.id);
        Self {
            version,
            members: members.into(),
        }
    }

    /// Membership version this snapshot was taken at.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Members ordered by identifier.
    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Look up a member by identifier.
    #[must_use]
    pub fn get(&self, id: &MemberId) -> Option<&Member> {
        self.members
            .binary_search_by(|member| member.id.cmp(id))
            .ok()
            .map(|index| &self.members[index])
    }

    /// Members in the `Alive` state, ordered by identifier.
    pub fn alive(&self) -> impl Iterator<Item = &Member> {
        self.members
            .iter()
            .filter(|member| member.state == MemberState::Alive)
    }

    /// Number of members that are `Alive` or `Suspect`.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.members
            .iter()
            .filter(|member| member.state.is_live())
            .count()
    }

    /// Aggregate state counts.
    #[must_use]
    pub fn stats(&self) -> MembershipStats {
        let mut stats = MembershipStats::default();
        for member in self.members.iter() {
            match member.state {
                MemberState::Alive => stats.alive += 1,
                MemberState::Suspect => stats.suspect += 1,
                MemberState::Dead => stats.dead += 1,
            }
        }
        stats
    }

    /// Number of members in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true when the snapshot holds no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Aggregate membership statistics for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MembershipStats {
    /// Members in `Alive`.
    pub alive: usize,
    /// Members in `Suspect`.
    pub suspect: usize,
    /// Members in `Dead`.
    pub dead: usize,
}

/// Change notifications published by the [`MemberDirectory`].
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    /// A member joined or re-announced itself.
    Joined {
        /// Member as recorded after the join.
        member: Member,
        /// Membership version after the change.
        version: u64,
    },
    /// A member departed and was removed.
    Left {
        /// Departed member.
        member: Member,
        /// Membership version after the change.
        version: u64,
    },
    /// The failure detector changed a member's liveness.
    StateChanged {
        /// Affected member.
        id: MemberId,
        /// New liveness.
        state: MemberState,
        /// Membership version after the change.
        version: u64,
    },
    /// An event referenced a member the directory does not know. No state changed.
    Inconsistent {
        /// Identifier carried by the event.
        id: MemberId,
    },
}

#[derive(Default)]
struct DirectoryState {
    members: BTreeMap<MemberId, Member>,
    version: u64,
}

/// Tracks known members and their zone metadata.
///
/// Mutations are expected from one logical writer (the discovery feed and
/// failure detector callbacks); readers take immutable snapshots. Every
/// effective mutation bumps the membership version.
pub struct MemberDirectory {
    state: RwLock<DirectoryState>,
    events_tx: broadcast::Sender<MembershipEvent>,
}

impl Default for MemberDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemberDirectory {
    /// Create an empty directory at version 0.
    #[must_use]
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(DirectoryState::default()),
            events_tx,
        }
    }

    /// Record a join. Re-joining an existing id refreshes its metadata and revives it.
    pub fn on_member_joined(&self, mut member: Member) -> u64 {
        member.state = MemberState::Alive;
        let version = {
            let mut state = self.state.write();
            state.version += 1;
            if let Some(previous) = state.members.get(&member.id) {
                debug!(
                    member = %member.id,
                    previous_zone = %previous.zone,
                    zone = %member.zone,
                    "member re-joined; refreshing metadata"
                );
            }
            state.members.insert(member.id.clone(), member.clone());
            state.version
        };
        self.publish(MembershipEvent::Joined { member, version });
        version
    }

    /// Record a confirmed departure. Unknown ids are reported and ignored.
    pub fn on_member_left(&self, id: &MemberId) -> Option<Member> {
        let removed = {
            let mut state = self.state.write();
            let removed = state.members.remove(id);
            if removed.is_some() {
                state.version += 1;
            }
            removed.map(|member| (member, state.version))
        };
        match removed {
            Some((member, version)) => {
                debug!(member = %member.id, version, "member left");
                self.publish(MembershipEvent::Left {
                    member: member.clone(),
                    version,
                });
                Some(member)
            }
            None => {
                self.report_inconsistency(id);
                None
            }
        }
    }

    /// Escalate a member's liveness after a missed heartbeat (`Alive → Suspect → Dead`).
    pub fn on_heartbeat_timeout(&self, id: &MemberId) -> Option<MemberState> {
        self.transition(id, |current| match current {
            MemberState::Alive => MemberState::Suspect,
            MemberState::Suspect | MemberState::Dead => MemberState::Dead,
        })
    }

    /// Mark a suspect member healthy again after a heartbeat arrives.
    ///
    /// Dead members stay dead until they re-join through discovery.
    pub fn on_heartbeat(&self, id: &MemberId) -> Option<MemberState> {
        self.transition(id, |current| match current {
            MemberState::Alive | MemberState::Suspect => MemberState::Alive,
            MemberState::Dead => MemberState::Dead,
        })
    }

    /// Immutable copy of the current members and version.
    #[must_use]
    pub fn snapshot(&self) -> MembershipSnapshot {
        let state = self.state.read();
        MembershipSnapshot {
            version: state.version,
            members: state.members.values().cloned().collect::<Vec<_>>().into(),
        }
    }

    /// Current membership version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Number of tracked members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().members.len()
    }

    /// Returns true when no members are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().members.is_empty()
    }

    /// Subscribe to membership events.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events_tx.subscribe()
    }

    fn transition(
        &self,
        id: &MemberId,
        next: impl FnOnce(MemberState) -> MemberState,
    ) -> Option<MemberState> {
        let outcome = {
            let mut state = self.state.write();
            let changed = state.members.get_mut(id).map(|member| {
                let updated = next(member.state);
                let changed = updated != member.state;
                member.state = updated;
                (updated, changed)
            });
            if let Some((_, true)) = changed {
                state.version += 1;
            }
            changed.map(|(updated, changed)| (updated, changed, state.version))
        };

        match outcome {
            Some((state, changed, version)) => {
                if changed {
                    debug!(member = %id, state = ?state, version, "member liveness changed");
                    self.publish(MembershipEvent::StateChanged {
                        id: id.clone(),
                        state,
                        version,
                    });
                }
                Some(state)
            }
            None => {
                self.report_inconsistency(id);
                None
            }
        }
    }

    fn report_inconsistency(&self, id: &MemberId) {
        let err = ClusterError::MembershipInconsistency { member: id.clone() };
        warn!(error = %err, "ignoring membership event");
        self.publish(MembershipEvent::Inconsistent { id: id.clone() });
    }

    fn publish(&self, event: MembershipEvent) {
        let _ = self.events_tx.send(event);
    }
}
