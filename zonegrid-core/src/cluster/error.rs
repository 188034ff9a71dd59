use std::fmt;

use thiserror::Error;

use super::membership::MemberId;
use super::partition::PartitionId;

/// Why a partition could not be placed with full group diversity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DegradedReason {
    /// Fewer groups than replicas; at least two replicas share a group.
    SharedGroup,
    /// Fewer eligible members than replica slots; some slots stay empty.
    UnderReplicated,
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedGroup => f.write_str("replicas share a member group"),
            Self::UnderReplicated => f.write_str("not enough members to fill every replica slot"),
        }
    }
}

/// Errors surfaced by the cluster coordination subsystems.
///
/// Only [`ClusterError::InvalidConfiguration`] and
/// [`ClusterError::PartitionCountMismatch`] are returned as hard failures.
/// The remaining kinds describe conditions that are recovered locally and
/// travel to observers as events or result payloads.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Configuration rejected while resolving settings; fatal at startup.
    #[error("invalid cluster configuration: {0}")]
    InvalidConfiguration(String),
    /// A membership event referenced a member the directory does not know.
    #[error("membership event references unknown member {member}")]
    MembershipInconsistency {
        /// Identifier carried by the offending event.
        member: MemberId,
    },
    /// Placement fell back to a non-diverse assignment for a partition.
    #[error("partition {partition} placed without full diversity: {reason}")]
    PlacementDegraded {
        /// Partition that could not be placed diversely.
        partition: PartitionId,
        /// What prevented a diverse placement.
        reason: DegradedReason,
    },
    /// Merge could not pick a winner for an entry without guessing.
    #[error("unresolved merge conflict in partition {partition} for key '{key}'")]
    UnresolvedMergeConflict {
        /// Partition containing the conflicting entry.
        partition: PartitionId,
        /// Key whose winner could not be determined.
        key: String,
    },
    /// Two partition maps with different partition counts cannot be merged.
    #[error("partition count mismatch (surviving {surviving}, joining {joining})")]
    PartitionCountMismatch {
        /// Partition count of the surviving side.
        surviving: u32,
        /// Partition count of the joining side.
        joining: u32,
    },
}

impl ClusterError {
    /// Shorthand for [`ClusterError::InvalidConfiguration`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Returns `true` for errors that must stop startup.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_) | Self::PartitionCountMismatch { .. }
        )
    }
}
