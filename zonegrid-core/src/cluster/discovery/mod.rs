use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::cluster::membership::{Member, MemberDirectory, MemberId, MemberState};

/// Errors that can occur during discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Seed entry failed to parse into a socket address.
    #[error("invalid seed member '{addr}': {source}")]
    InvalidSeed {
        /// Original string provided in configuration.
        addr: String,
        /// Parser error emitted by `SocketAddr::from_str`.
        source: std::net::AddrParseError,
    },
    /// Seed entry carried no zone label.
    #[error("seed member '{addr}' has an empty zone label")]
    MissingZone {
        /// Address of the offending entry.
        addr: String,
    },
    /// Backend-specific failure reported by an external source.
    #[error("discovery source failed: {0}")]
    Source(String),
}

/// A member as reported by a discovery source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredMember {
    /// Stable identifier.
    pub id: MemberId,
    /// Zone label.
    pub zone: String,
    /// Advertised address.
    pub address: SocketAddr,
}

impl DiscoveredMember {
    /// Directory record for this member, alive as of now.
    #[must_use]
    pub fn to_member(&self) -> Member {
        Member::with_id(self.id.clone(), self.address, self.zone.clone())
    }
}

/// One statically configured member, as written in roster and seed files.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedMember {
    /// Identifier; defaults to the address.
    #[serde(default)]
    pub id: Option<String>,
    /// Zone label.
    pub zone: String,
    /// `host:port` address.
    pub address: String,
}

impl SeedMember {
    /// Validate and convert into a discovered member.
    pub fn resolve(&self) -> Result<DiscoveredMember, DiscoveryError> {
        let address =
            SocketAddr::from_str(&self.address).map_err(|source| DiscoveryError::InvalidSeed {
                addr: self.address.clone(),
                source,
            })?;
        if self.zone.trim().is_empty() {
            return Err(DiscoveryError::MissingZone {
                addr: self.address.clone(),
            });
        }
        let id = self
            .id
            .as_deref()
            .map_or_else(|| MemberId::from(address), MemberId::from);
        Ok(DiscoveredMember {
            id,
            zone: self.zone.clone(),
            address,
        })
    }
}

/// Receives membership callbacks from a discovery collaborator.
pub trait DiscoveryListener: Send + Sync {
    /// A member appeared or re-announced itself.
    fn member_joined(&self, member: &DiscoveredMember);
    /// A member departed for good.
    fn member_left(&self, id: &MemberId);
}

/// Receives liveness callbacks from a failure detector.
pub trait FailureListener: Send + Sync {
    /// A heartbeat was missed.
    fn heartbeat_timeout(&self, id: &MemberId);
    /// A heartbeat arrived.
    fn heartbeat(&self, id: &MemberId);
}

impl DiscoveryListener for MemberDirectory {
    fn member_joined(&self, member: &DiscoveredMember) {
        self.on_member_joined(member.to_member());
    }

    fn member_left(&self, id: &MemberId) {
        self.on_member_left(id);
    }
}

impl FailureListener for MemberDirectory {
    fn heartbeat_timeout(&self, id: &MemberId) {
        if let Some(MemberState::Dead) = self.on_heartbeat_timeout(id) {
            debug!(member = %id, "failure detector declared member dead");
        }
    }

    fn heartbeat(&self, id: &MemberId) {
        self.on_heartbeat(id);
    }
}

/// Async interface implemented by discovery backends.
#[async_trait]
pub trait ClusterDiscovery: Send + Sync {
    /// Returns the members currently visible to the backend.
    async fn discover(&self) -> Result<Vec<DiscoveredMember>, DiscoveryError>;
}

/// Convenience trait-object alias for dynamic dispatch.
pub type DynDiscovery = Box<dyn ClusterDiscovery>;

/// Discovery backend backed by a static seed list.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    seeds: Vec<DiscoveredMember>,
}

impl StaticDiscovery {
    /// Validate every seed up front.
    pub fn new(seeds: &[SeedMember]) -> Result<Self, DiscoveryError> {
        let seeds = seeds
            .iter()
            .map(SeedMember::resolve)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { seeds })
    }

    /// Resolved seeds in configuration order.
    #[must_use]
    pub fn seeds(&self) -> &[DiscoveredMember] {
        &self.seeds
    }
}

#[async_trait]
impl ClusterDiscovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<DiscoveredMember>, DiscoveryError> {
        Ok(self.seeds.clone())
    }
}

/// Members that appeared or vanished between two discovery rounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDelta {
    /// Newly seen members and members whose zone or address changed.
    pub joined: Vec<MemberId>,
    /// Members no longer reported.
    pub left: Vec<MemberId>,
}

impl FeedDelta {
    /// Returns `true` when the round changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Turns full discovery results into join/leave callbacks.
pub struct DiscoveryFeed {
    source: DynDiscovery,
    known: BTreeMap<MemberId, DiscoveredMember>,
}

impl DiscoveryFeed {
    /// Wrap a discovery backend.
    #[must_use]
    pub fn new(source: DynDiscovery) -> Self {
        Self {
            source,
            known: BTreeMap::new(),
        }
    }

    /// Run one discovery round and deliver the difference to `listener`.
    ///
    /// A failed round leaves the known set untouched.
    pub async fn refresh<L>(&mut self, listener: &L) -> Result<FeedDelta, DiscoveryError>
    where
        L: DiscoveryListener + ?Sized,
    {
        let current: BTreeMap<MemberId, DiscoveredMember> = self
            .source
            .discover()
            .await?
            .into_iter()
            .map(|member| (member.id.clone(), member))
            .collect();

        let mut delta = FeedDelta::default();
        for (id, member) in &current {
            if self.known.get(id) != Some(member) {
                listener.member_joined(member);
                delta.joined.push(id.clone());
            }
        }
        for id in self.known.keys() {
            if !current.contains_key(id) {
                listener.member_left(id);
                delta.left.push(id.clone());
            }
        }

        if !delta.is_empty() {
            debug!(
                joined = delta.joined.len(),
                left = delta.left.len(),
                known = current.len(),
                "discovery round changed membership"
            );
        }
        self.known = current;
        Ok(delta)
    }

    /// Members reported by the last successful round.
    pub fn known(&self) -> impl Iterator<Item = &DiscoveredMember> {
        self.known.values()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn seed(address: &str, zone: &str) -> SeedMember {
        SeedMember {
            id: None,
            zone: zone.to_string(),
            address: address.to_string(),
        }
    }

    #[test]
    fn seed_defaults_id_to_address() {
        let member = seed("10.0.0.1:5701", "zone-a").resolve().unwrap();
        assert_eq!(member.id.as_str(), "10.0.0.1:5701");
    }

    #[test]
    fn invalid_seed_is_rejected() {
        assert!(matches!(
            seed("not-an-addr", "zone-a").resolve(),
            Err(DiscoveryError::InvalidSeed { .. })
        ));
        assert!(matches!(
            seed("10.0.0.1:5701", " ").resolve(),
            Err(DiscoveryError::MissingZone { .. })
        ));
    }

    #[test]
    fn directory_implements_listeners() {
        let directory = MemberDirectory::new();
        let member = seed("10.0.0.1:5701", "zone-a").resolve().unwrap();
        DiscoveryListener::member_joined(&directory, &member);
        FailureListener::heartbeat_timeout(&directory, &member.id);
        assert_eq!(
            directory.snapshot().get(&member.id).unwrap().state,
            MemberState::Suspect
        );
        DiscoveryListener::member_left(&directory, &member.id);
        assert!(directory.is_empty());
    }
}
