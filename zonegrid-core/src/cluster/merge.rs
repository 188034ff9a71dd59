//! Split-brain reconciliation of partition data when sub-clusters rejoin.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, info, warn};

use super::config::GridSettings;
use super::error::ClusterError;
use super::partition::{PartitionId, PartitionMap};
use super::store::{Entry, PartitionData, PartitionStore};

/// Strategy applied to entries that diverged during a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergePolicy {
    /// Newer logical timestamp wins; ties go to the surviving side.
    LatestUpdate,
    /// Union of keys; shared keys keep the surviving value.
    AddNewEntry,
    /// Only the surviving side's data is kept.
    Discard,
    /// The joining value wins for shared keys.
    PassThrough,
    /// Higher hit count wins; ties go to the surviving side.
    HigherHits,
}

impl FromStr for MergePolicy {
    type Err = ClusterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let bare = trimmed
            .strip_prefix("hz.")
            .or_else(|| trimmed.strip_prefix("HZ."))
            .unwrap_or(trimmed);
        match bare.to_ascii_uppercase().replace('-', "_").as_str() {
            "LATEST_UPDATE" | "LATEST_UPDATE_WINS" => Ok(Self::LatestUpdate),
            "ADD_NEW_ENTRY" | "ADD_NEW_ENTRY_ONLY" | "PUT_IF_ABSENT" => Ok(Self::AddNewEntry),
            "DISCARD" => Ok(Self::Discard),
            "PASS_THROUGH" => Ok(Self::PassThrough),
            "HIGHER_HITS" => Ok(Self::HigherHits),
            _ => Err(ClusterError::config(format!(
                "unknown merge policy '{value}'"
            ))),
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LatestUpdate => "LATEST_UPDATE",
            Self::AddNewEntry => "ADD_NEW_ENTRY",
            Self::Discard => "DISCARD",
            Self::PassThrough => "PASS_THROUGH",
            Self::HigherHits => "HIGHER_HITS",
        })
    }
}

/// State one sub-cluster accumulated while split off.
#[derive(Debug, Clone)]
pub struct SplitSide {
    /// Partition assignments the side ended up with.
    pub map: PartitionMap,
    /// Data the side holds.
    pub store: PartitionStore,
    /// Whether the side held quorum during the split.
    pub was_quorate: bool,
    /// Members on the side when it rejoined.
    pub member_count: usize,
}

impl SplitSide {
    /// Bundle one side's state.
    #[must_use]
    pub const fn new(
        map: PartitionMap,
        store: PartitionStore,
        was_quorate: bool,
        member_count: usize,
    ) -> Self {
        Self {
            map,
            store,
            was_quorate,
            member_count,
        }
    }
}

/// Which input of [`MergeCoordinator::merge`] survived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSide {
    /// The first argument.
    First,
    /// The second argument.
    Second,
}

/// An entry the policy could not decide without guessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedConflict {
    /// Partition holding the key.
    pub partition: PartitionId,
    /// Conflicting key. It is left out of the merged store.
    pub key: String,
    /// Value held by the surviving side.
    pub surviving: Entry,
    /// Value held by the joining side.
    pub joining: Entry,
}

impl From<&UnresolvedConflict> for ClusterError {
    fn from(value: &UnresolvedConflict) -> Self {
        Self::UnresolvedMergeConflict {
            partition: value.partition,
            key: value.key.clone(),
        }
    }
}

/// Reconciled state produced by a merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Single partition map carrying the surviving side's assignments.
    pub map: PartitionMap,
    /// Reconciled data.
    pub store: PartitionStore,
    /// Entries requiring out-of-band resolution.
    pub conflicts: Vec<UnresolvedConflict>,
    /// Side whose assignments and tie-breaks won.
    pub surviving: MergeSide,
    /// Partitions whose data diverged and went through the policy.
    pub merged_partitions: usize,
}

/// Applies the configured [`MergePolicy`] when split sub-clusters rejoin.
#[derive(Debug, Clone, Copy)]
pub struct MergeCoordinator {
    policy: MergePolicy,
}

impl MergeCoordinator {
    /// Create a coordinator from resolved settings.
    #[must_use]
    pub const fn new(settings: &GridSettings) -> Self {
        Self::with_policy(settings.merge_policy)
    }

    /// Create a coordinator for an explicit policy.
    #[must_use]
    pub const fn with_policy(policy: MergePolicy) -> Self {
        Self { policy }
    }

    /// Configured policy.
    #[must_use]
    pub const fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Reconcile two sides into one map and store.
    ///
    /// The surviving side is the one that held quorum, then the larger one,
    /// then `first`. Under [`MergePolicy::Discard`] the joining side's data is
    /// dropped entirely, including partitions the survivor holds nothing for.
    ///
    /// The merged map is not tied to either side's membership: its
    /// membership version is reset to 0 and must be re-planned.
    pub fn merge(&self, first: SplitSide, second: SplitSide) -> Result<MergeOutcome, ClusterError> {
        let first_survives = match (first.was_quorate, second.was_quorate) {
            (true, false) => true,
            (false, true) => false,
            _ => first.member_count >= second.member_count,
        };
        let (surviving_side, survivor, joiner) = if first_survives {
            (MergeSide::First, first, second)
        } else {
            (MergeSide::Second, second, first)
        };

        if survivor.map.partition_count() != joiner.map.partition_count() {
            return Err(ClusterError::PartitionCountMismatch {
                surviving: survivor.map.partition_count(),
                joining: joiner.map.partition_count(),
            });
        }

        let ids: BTreeSet<PartitionId> = survivor
            .store
            .partition_ids()
            .chain(joiner.store.partition_ids())
            .collect();

        let mut store = survivor.store.clone();
        let mut conflicts = Vec::new();
        let mut merged_partitions = 0;
        for id in ids {
            match (survivor.store.partition(id), joiner.store.partition(id)) {
                (Some(kept), Some(incoming)) if kept != incoming => {
                    let merged = self.merge_partition(id, kept, incoming, &mut conflicts);
                    store.replace_partition(id, merged);
                    merged_partitions += 1;
                }
                (None, Some(incoming)) if self.policy != MergePolicy::Discard => {
                    debug!(partition = %id, "adopting partition held only by the joining side");
                    store.replace_partition(id, incoming.clone());
                }
                _ => {}
            }
        }

        // Membership versions of the two sides come from different directories.
        let mut map = survivor.map;
        map.set_version(map.version().max(joiner.map.version()) + 1);
        map.set_membership_version(0);

        if !conflicts.is_empty() {
            warn!(
                policy = %self.policy,
                conflicts = conflicts.len(),
                "merge left entries unresolved; manual resolution required"
            );
        }
        info!(
            policy = %self.policy,
            surviving = ?surviving_side,
            merged_partitions,
            entries = store.len(),
            map_version = map.version(),
            "split-brain merge complete"
        );

        Ok(MergeOutcome {
            map,
            store,
            conflicts,
            surviving: surviving_side,
            merged_partitions,
        })
    }

    fn merge_partition(
        &self,
        partition: PartitionId,
        kept: &PartitionData,
        incoming: &PartitionData,
        conflicts: &mut Vec<UnresolvedConflict>,
    ) -> PartitionData {
        if self.policy == MergePolicy::Discard {
            return kept.clone();
        }

        let mut merged = kept.clone();
        for (key, joining) in incoming {
            let Some(surviving) = merged.get(key) else {
                merged.insert(key.clone(), joining.clone());
                continue;
            };
            if surviving == joining {
                continue;
            }
            match self.resolve(surviving, joining) {
                Some(Winner::Surviving) => {}
                Some(Winner::Joining) => {
                    merged.insert(key.clone(), joining.clone());
                }
                None => {
                    if let Some(surviving) = merged.remove(key) {
                        debug!(%partition, key = %key, "entry left unresolved");
                        conflicts.push(UnresolvedConflict {
                            partition,
                            key: key.clone(),
                            surviving,
                            joining: joining.clone(),
                        });
                    }
                }
            }
        }
        merged
    }

    fn resolve(&self, surviving: &Entry, joining: &Entry) -> Option<Winner> {
        match self.policy {
            MergePolicy::AddNewEntry | MergePolicy::Discard => Some(Winner::Surviving),
            MergePolicy::PassThrough => Some(Winner::Joining),
            MergePolicy::HigherHits => Some(if joining.hits > surviving.hits {
                Winner::Joining
            } else {
                Winner::Surviving
            }),
            MergePolicy::LatestUpdate => match (surviving.timestamp, joining.timestamp) {
                (Some(kept), Some(incoming)) if incoming > kept => Some(Winner::Joining),
                (Some(_), Some(_)) => Some(Winner::Surviving),
                _ => None,
            },
        }
    }
}

enum Winner {
    Surviving,
    Joining,
}
