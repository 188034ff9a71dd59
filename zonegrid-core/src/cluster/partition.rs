use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::error::{ClusterError, DegradedReason};
use super::grouping::{GroupKey, MemberGrouping};
use super::membership::{MemberId, MembershipSnapshot};

/// Logical partition identifier in `[0, partition_count)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Replica slots of one partition: slot 0 is the primary, the rest are backups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Partition identifier.
    pub id: PartitionId,
    /// Replica slots; `None` marks an unfilled slot.
    pub replicas: Vec<Option<MemberId>>,
    /// Set when the last placement could not satisfy group diversity.
    pub degraded: Option<DegradedReason>,
}

impl Partition {
    fn empty(id: PartitionId, replica_count: usize) -> Self {
        Self {
            id,
            replicas: vec![None; replica_count],
            degraded: None,
        }
    }

    /// Member owning the primary slot.
    #[must_use]
    pub fn primary(&self) -> Option<&MemberId> {
        self.replicas.first().and_then(Option::as_ref)
    }

    /// Members owning backup slots, in slot order.
    pub fn backups(&self) -> impl Iterator<Item = &MemberId> {
        self.replicas.iter().skip(1).flatten()
    }

    /// All members holding a replica, in slot order.
    pub fn members(&self) -> impl Iterator<Item = &MemberId> {
        self.replicas.iter().flatten()
    }

    /// Returns `true` when `member` holds any slot of this partition.
    #[must_use]
    pub fn contains(&self, member: &MemberId) -> bool {
        self.members().any(|held| held == member)
    }

    /// Returns `true` when every slot is filled and no degradation was recorded.
    #[must_use]
    pub fn is_diverse(&self) -> bool {
        self.degraded.is_none() && self.replicas.iter().all(Option::is_some)
    }
}

/// Change of a single replica slot between two maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMove {
    /// Partition whose slot changed.
    pub partition: PartitionId,
    /// Slot index (0 = primary).
    pub slot: usize,
    /// Previous holder.
    pub from: Option<MemberId>,
    /// New holder.
    pub to: Option<MemberId>,
}

/// Assignment of every partition to its replica slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMap {
    version: u64,
    membership_version: u64,
    backup_count: usize,
    partitions: Vec<Partition>,
}

impl PartitionMap {
    /// Create an unassigned map with `partition_count` partitions and `backup_count` backups.
    #[must_use]
    pub fn new(partition_count: u32, backup_count: usize) -> Self {
        let replica_count = backup_count + 1;
        Self {
            version: 0,
            membership_version: 0,
            backup_count,
            partitions: (0..partition_count)
                .map(|id| Partition::empty(PartitionId(id), replica_count))
                .collect(),
        }
    }

    pub(crate) const fn from_parts(
        version: u64,
        membership_version: u64,
        backup_count: usize,
        partitions: Vec<Partition>,
    ) -> Self {
        Self {
            version,
            membership_version,
            backup_count,
            partitions,
        }
    }

    /// Monotonic map version, bumped on every change.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Membership version the map was last planned against.
    #[must_use]
    pub const fn membership_version(&self) -> u64 {
        self.membership_version
    }

    pub(crate) const fn set_membership_version(&mut self, version: u64) {
        self.membership_version = version;
    }

    pub(crate) const fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Configured backups per partition.
    #[must_use]
    pub const fn backup_count(&self) -> usize {
        self.backup_count
    }

    /// Number of partitions, fixed at creation.
    #[must_use]
    pub fn partition_count(&self) -> u32 {
        u32::try_from(self.partitions.len()).unwrap_or(u32::MAX)
    }

    /// All partitions in id order.
    #[must_use]
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Look up one partition.
    #[must_use]
    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(id.0 as usize)
    }

    /// Primary owner of a partition.
    #[must_use]
    pub fn primary(&self, id: PartitionId) -> Option<&MemberId> {
        self.partition(id).and_then(Partition::primary)
    }

    /// Partitions where `member` holds any slot.
    #[must_use]
    pub fn partitions_owned_by(&self, member: &MemberId) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .filter(|partition| partition.contains(member))
            .map(|partition| partition.id)
            .collect()
    }

    /// Partitions where `member` holds the primary slot.
    #[must_use]
    pub fn primaries_owned_by(&self, member: &MemberId) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .filter(|partition| partition.primary() == Some(member))
            .map(|partition| partition.id)
            .collect()
    }

    /// Replica slots held per member.
    #[must_use]
    pub fn load_by_member(&self) -> BTreeMap<MemberId, usize> {
        let mut load = BTreeMap::new();
        for member in self.partitions.iter().flat_map(Partition::members) {
            *load.entry(member.clone()).or_insert(0) += 1;
        }
        load
    }

    /// Replica slots held per member group. Holders missing from `snapshot` are skipped.
    #[must_use]
    pub fn load_by_group(
        &self,
        snapshot: &MembershipSnapshot,
        grouping: &MemberGrouping,
    ) -> BTreeMap<GroupKey, usize> {
        let mut load = BTreeMap::new();
        for (member, slots) in self.load_by_member() {
            if let Some(record) = snapshot.get(&member) {
                *load.entry(grouping.group_of(record)).or_insert(0) += slots;
            }
        }
        load
    }

    /// Partitions currently marked degraded.
    #[must_use]
    pub fn degraded(&self) -> Vec<(PartitionId, DegradedReason)> {
        self.partitions
            .iter()
            .filter_map(|partition| partition.degraded.map(|reason| (partition.id, reason)))
            .collect()
    }

    /// Slot-level differences between `prior` and `self`.
    #[must_use]
    pub fn reassignments_from(&self, prior: &Self) -> Vec<SlotMove> {
        let mut moves = Vec::new();
        for (index, partition) in self.partitions.iter().enumerate() {
            let previous = prior
                .partitions
                .get(index)
                .map_or(&[][..], |p| p.replicas.as_slice());
            let width = partition.replicas.len().max(previous.len());
            for slot in 0..width {
                let from = previous.get(slot).cloned().flatten();
                let to = partition.replicas.get(slot).cloned().flatten();
                if from != to {
                    moves.push(SlotMove {
                        partition: partition.id,
                        slot,
                        from,
                        to,
                    });
                }
            }
        }
        moves
    }
}

/// Shared holder of the current [`PartitionMap`].
///
/// Readers clone an `Arc` snapshot and never hold a lock while routing.
/// Writers (the placement planner and the merge coordinator) serialise
/// through a single writer guard, so the two never interleave.
pub struct PartitionTable {
    current: RwLock<Arc<PartitionMap>>,
    writer: Mutex<()>,
}

impl PartitionTable {
    /// Wrap an initial map.
    #[must_use]
    pub fn new(initial: PartitionMap) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            writer: Mutex::new(()),
        }
    }

    /// Immutable snapshot of the current map.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PartitionMap> {
        Arc::clone(&*self.current.read())
    }

    /// Compute and install a successor map while holding the writer guard.
    ///
    /// When `update` fails the current map is left untouched.
    pub fn update<F>(&self, update: F) -> Result<Arc<PartitionMap>, ClusterError>
    where
        F: FnOnce(&PartitionMap) -> Result<PartitionMap, ClusterError>,
    {
        let _writer = self.writer.lock();
        let current = self.snapshot();
        let next = Arc::new(update(&current)?);
        *self.current.write() = Arc::clone(&next);
        Ok(next)
    }
}
