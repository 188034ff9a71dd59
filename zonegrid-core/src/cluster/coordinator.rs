use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::GridSettings;
use super::error::ClusterError;
use super::membership::{MemberDirectory, MembershipEvent};
use super::merge::{MergeCoordinator, MergeOutcome, SplitSide, UnresolvedConflict};
use super::partition::{PartitionMap, PartitionTable};
use super::placement::{DegradedPlacement, PlacementOutcome, ZonePlacementPlanner};
use super::quorum::{DataOperation, QuorumMonitor, QuorumState, QuorumTransition};
use super::store::PartitionStore;

const EVENT_CAPACITY: usize = 1_024;

/// Observable outcomes of coordination passes.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    /// Live members fell below the quorum minimum.
    QuorumLost(QuorumTransition),
    /// Live members recovered to the quorum minimum.
    QuorumRestored(QuorumTransition),
    /// A partition was placed without full diversity.
    PlacementDegraded(DegradedPlacement),
    /// A new partition map was installed.
    PartitionsMigrated {
        /// Version of the installed map.
        map_version: u64,
        /// Membership version it was planned against.
        membership_version: u64,
        /// Number of slots that changed holder.
        moves: usize,
    },
    /// A merge left an entry for out-of-band resolution.
    MergeConflict(UnresolvedConflict),
}

/// Summary of one [`ClusterCoordinator::reconcile`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Membership version the pass observed.
    pub membership_version: u64,
    /// Version of the installed map.
    pub map_version: u64,
    /// Slots that changed holder.
    pub moves: usize,
    /// Partitions reported as degraded by this pass.
    pub degraded: usize,
    /// Quorum state after the pass.
    pub quorum: QuorumState,
}

/// Wires the directory, planner, quorum monitor and merge coordinator together.
///
/// Every pass works on one membership snapshot. The partition table's
/// writer guard keeps planning and merging from interleaving.
pub struct ClusterCoordinator {
    directory: Arc<MemberDirectory>,
    table: Arc<PartitionTable>,
    planner: ZonePlacementPlanner,
    quorum: QuorumMonitor,
    merger: MergeCoordinator,
    events_tx: broadcast::Sender<ClusterEvent>,
    passes: AtomicU64,
}

impl ClusterCoordinator {
    /// Build every component from one resolved configuration.
    #[must_use]
    pub fn new(settings: &GridSettings) -> Self {
        Self::with_directory(settings, Arc::new(MemberDirectory::new()))
    }

    /// Build around an existing directory.
    #[must_use]
    pub fn with_directory(settings: &GridSettings, directory: Arc<MemberDirectory>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            directory,
            table: Arc::new(PartitionTable::new(PartitionMap::new(
                settings.partition_count,
                settings.backup_count,
            ))),
            planner: ZonePlacementPlanner::new(settings),
            quorum: QuorumMonitor::new(settings.quorum.clone()),
            merger: MergeCoordinator::new(settings),
            events_tx,
            passes: AtomicU64::new(0),
        }
    }

    /// Member directory fed by discovery and the failure detector.
    #[must_use]
    pub fn directory(&self) -> &Arc<MemberDirectory> {
        &self.directory
    }

    /// Shared partition table; readers call [`PartitionTable::snapshot`].
    #[must_use]
    pub fn table(&self) -> &Arc<PartitionTable> {
        &self.table
    }

    /// Current partition map.
    #[must_use]
    pub fn partition_map(&self) -> Arc<PartitionMap> {
        self.table.snapshot()
    }

    /// Placement planner in use.
    #[must_use]
    pub const fn planner(&self) -> &ZonePlacementPlanner {
        &self.planner
    }

    /// Current quorum state.
    #[must_use]
    pub fn quorum_state(&self) -> QuorumState {
        self.quorum.state()
    }

    /// Whether `operation` is currently allowed by the quorum policy.
    #[must_use]
    pub fn permits(&self, operation: DataOperation) -> bool {
        self.quorum.permits(operation)
    }

    /// Completed reconcile passes since construction.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Subscribe to coordination events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events_tx.subscribe()
    }

    /// Evaluate quorum and re-plan placement against the current membership.
    pub fn reconcile(&self) -> Result<ReconcileReport, ClusterError> {
        let snapshot = self.directory.snapshot();
        match self.quorum.evaluate(&snapshot) {
            Some(transition) if transition.to == QuorumState::SubQuorate => {
                self.publish(ClusterEvent::QuorumLost(transition));
            }
            Some(transition) => self.publish(ClusterEvent::QuorumRestored(transition)),
            None => {}
        }

        let mut planned = None;
        let map = self.table.update(|current| {
            if current.membership_version() > snapshot.version() {
                debug!(
                    current = current.membership_version(),
                    observed = snapshot.version(),
                    "skipping placement for a stale membership snapshot"
                );
                return Ok(current.clone());
            }
            let PlacementOutcome {
                map,
                moves,
                degraded,
            } = self.planner.plan(&snapshot, current);
            planned = Some((moves.len(), degraded));
            Ok(map)
        })?;

        let (moves, degraded) = planned.unwrap_or_default();
        let degraded_count = degraded.len();
        for placement in degraded {
            self.publish(ClusterEvent::PlacementDegraded(placement));
        }
        if moves > 0 {
            self.publish(ClusterEvent::PartitionsMigrated {
                map_version: map.version(),
                membership_version: map.membership_version(),
                moves,
            });
        }
        self.passes.fetch_add(1, Ordering::Relaxed);

        Ok(ReconcileReport {
            membership_version: snapshot.version(),
            map_version: map.version(),
            moves,
            degraded: degraded_count,
            quorum: self.quorum.state(),
        })
    }

    /// Merge a rejoining sub-cluster into local state, then re-plan.
    ///
    /// The joining side's members are expected to have been announced to the
    /// directory already; the re-plan places partitions across both sides and
    /// drops replicas held by members this directory does not know.
    ///
    /// The local side counts as quorate when the local monitor is quorate at
    /// the time of the call. The monitor does not keep a history of the split,
    /// so a side that lost quorum during the split and regained it before
    /// rejoining is treated as quorate.
    ///
    /// The merged map is stamped with the local directory's version so the
    /// following re-plan is never skipped as stale.
    pub fn rejoin(
        &self,
        local_store: PartitionStore,
        joining: SplitSide,
    ) -> Result<MergeOutcome, ClusterError> {
        let snapshot = self.directory.snapshot();
        let was_quorate = self.quorum.is_quorate();

        let mut merged = None;
        self.table.update(|current| {
            let local =
                SplitSide::new(current.clone(), local_store, was_quorate, snapshot.live_count());
            let mut outcome = self.merger.merge(local, joining)?;
            outcome.map.set_membership_version(snapshot.version());
            let map = outcome.map.clone();
            merged = Some(outcome);
            Ok(map)
        })?;
        let outcome = merged.ok_or_else(|| ClusterError::config("merge produced no outcome"))?;

        for conflict in &outcome.conflicts {
            self.publish(ClusterEvent::MergeConflict(conflict.clone()));
        }
        info!(
            conflicts = outcome.conflicts.len(),
            map_version = outcome.map.version(),
            "sub-cluster rejoined"
        );

        self.reconcile()?;
        Ok(outcome)
    }

    /// Re-plan on every membership change until the shutdown signal fires.
    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut updates = coordinator.directory.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    update = updates.recv() => match update {
                        Ok(MembershipEvent::Inconsistent { .. }) => {}
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            if let Err(err) = coordinator.reconcile() {
                                warn!("reconcile after membership change failed: {err}");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    fn publish(&self, event: ClusterEvent) {
        let _ = self.events_tx.send(event);
    }
}
