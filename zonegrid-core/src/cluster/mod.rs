//! Cluster coordination primitives (membership, placement, quorum, merge).

/// Coordinator wiring the subsystems to one membership feed.
pub mod coordinator;
/// Declarative configuration schema shared by CLI and runtime components.
pub mod config;
/// Discovery adapters and listener traits for membership callbacks.
pub mod discovery;
/// Error types surfaced by cluster subsystems.
pub mod error;
pub mod grouping;
/// Member directory with versioned snapshots.
pub mod membership;
pub mod merge;
/// Partition identifiers, maps and the shared partition table.
pub mod partition;
/// Zone-aware placement planner.
pub mod placement;
/// Quorum policy and monitor.
pub mod quorum;
/// Opaque transport-security and symmetric-encryption settings.
pub mod security;
/// Partition data held for split-brain merges.
pub mod store;

pub use config::{GridConfig, GridSettings};
pub use coordinator::{ClusterCoordinator, ClusterEvent, ReconcileReport};
pub use discovery::{
    ClusterDiscovery, DiscoveredMember, DiscoveryError, DiscoveryFeed, DiscoveryListener,
    FailureListener, SeedMember, StaticDiscovery,
};
pub use error::{ClusterError, DegradedReason};
pub use grouping::{GroupKey, MemberGrouping, PartitionGroupType};
pub use membership::{
    Member, MemberDirectory, MemberId, MemberState, MembershipEvent, MembershipSnapshot,
    MembershipStats,
};
pub use merge::{
    MergeCoordinator, MergeOutcome, MergePolicy, MergeSide, SplitSide, UnresolvedConflict,
};
pub use partition::{Partition, PartitionId, PartitionMap, PartitionTable, SlotMove};
pub use placement::{DegradedPlacement, PlacementOutcome, ZonePlacementPlanner};
pub use quorum::{DataOperation, QuorumMonitor, QuorumPolicy, QuorumState, QuorumType};
pub use store::{Entry, PartitionData, PartitionStore};
