use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::error::ClusterError;
use super::membership::MembershipSnapshot;

/// Which data operations a quorum policy guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuorumType {
    /// Reads are refused while sub-quorate.
    Read,
    /// Writes are refused while sub-quorate.
    Write,
    /// Reads and writes are refused while sub-quorate.
    ReadWrite,
}

impl QuorumType {
    /// Returns `true` when the policy guards `operation`.
    #[must_use]
    pub const fn protects(self, operation: DataOperation) -> bool {
        matches!(
            (self, operation),
            (Self::ReadWrite, _)
                | (Self::Read, DataOperation::Read)
                | (Self::Write, DataOperation::Write)
        )
    }
}

impl FromStr for QuorumType {
    type Err = ClusterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "READ" => Ok(Self::Read),
            "WRITE" => Ok(Self::Write),
            "READ_WRITE" => Ok(Self::ReadWrite),
            _ => Err(ClusterError::config(format!("unknown quorum type '{value}'"))),
        }
    }
}

impl fmt::Display for QuorumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::ReadWrite => "READ_WRITE",
        })
    }
}

/// Operation kinds gated by quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOperation {
    /// A map read.
    Read,
    /// A map write.
    Write,
}

/// Named minimum-membership rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumPolicy {
    name: String,
    min_size: usize,
    protects: QuorumType,
}

impl QuorumPolicy {
    /// Create a policy requiring `min_size` live members.
    pub fn new(name: impl Into<String>, min_size: usize, protects: QuorumType) -> Self {
        Self {
            name: name.into(),
            min_size,
            protects,
        }
    }

    /// Policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimum live members.
    #[must_use]
    pub const fn min_size(&self) -> usize {
        self.min_size
    }

    /// Operations guarded while sub-quorate.
    #[must_use]
    pub const fn protects(&self) -> QuorumType {
        self.protects
    }

    /// Whether `live` members satisfy the policy.
    #[must_use]
    pub const fn is_met_by(&self, live: usize) -> bool {
        live >= self.min_size
    }
}

/// Quorum state of the local side of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumState {
    /// Enough live members are visible.
    Quorate,
    /// Too few live members are visible; guarded operations are refused.
    SubQuorate,
}

impl fmt::Display for QuorumState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Quorate => "quorate",
            Self::SubQuorate => "sub-quorate",
        })
    }
}

/// A change of quorum state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumTransition {
    /// State before the evaluated snapshot.
    pub from: QuorumState,
    /// State after the evaluated snapshot.
    pub to: QuorumState,
    /// Live members counted in the snapshot.
    pub live: usize,
    /// Minimum required by the policy.
    pub required: usize,
    /// Membership version of the snapshot.
    pub version: u64,
}

#[derive(Debug)]
struct MonitorState {
    state: QuorumState,
    last_version: Option<u64>,
    live: usize,
}

/// Tracks quorum across membership snapshots.
///
/// The monitor starts sub-quorate and only moves on snapshots newer than
/// the last one it evaluated, so a stale snapshot can never flip the state
/// back.
#[derive(Debug)]
pub struct QuorumMonitor {
    policy: QuorumPolicy,
    inner: Mutex<MonitorState>,
}

impl QuorumMonitor {
    /// Create a monitor for `policy`.
    #[must_use]
    pub fn new(policy: QuorumPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(MonitorState {
                state: QuorumState::SubQuorate,
                last_version: None,
                live: 0,
            }),
        }
    }

    /// Policy enforced by this monitor.
    #[must_use]
    pub const fn policy(&self) -> &QuorumPolicy {
        &self.policy
    }

    /// Evaluate a snapshot and report a transition if the state changed.
    pub fn evaluate(&self, snapshot: &MembershipSnapshot) -> Option<QuorumTransition> {
        let mut inner = self.inner.lock();
        if inner
            .last_version
            .is_some_and(|seen| snapshot.version() <= seen)
        {
            return None;
        }
        inner.last_version = Some(snapshot.version());

        let live = snapshot.live_count();
        inner.live = live;
        let next = if self.policy.is_met_by(live) {
            QuorumState::Quorate
        } else {
            QuorumState::SubQuorate
        };
        if next == inner.state {
            return None;
        }

        let transition = QuorumTransition {
            from: inner.state,
            to: next,
            live,
            required: self.policy.min_size,
            version: snapshot.version(),
        };
        inner.state = next;
        drop(inner);

        match next {
            QuorumState::SubQuorate => warn!(
                quorum = %self.policy.name,
                live,
                required = self.policy.min_size,
                version = transition.version,
                "quorum lost; refusing {} operations",
                self.policy.protects
            ),
            QuorumState::Quorate => info!(
                quorum = %self.policy.name,
                live,
                required = self.policy.min_size,
                version = transition.version,
                "quorum restored"
            ),
        }
        Some(transition)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> QuorumState {
        self.inner.lock().state
    }

    /// Returns `true` when the last evaluated snapshot met the policy.
    #[must_use]
    pub fn is_quorate(&self) -> bool {
        self.state() == QuorumState::Quorate
    }

    /// Live members counted in the last evaluated snapshot.
    #[must_use]
    pub fn live_members(&self) -> usize {
        self.inner.lock().live
    }

    /// Whether `operation` may proceed in the current state.
    #[must_use]
    pub fn permits(&self, operation: DataOperation) -> bool {
        self.is_quorate() || !self.policy.protects.protects(operation)
    }
}
