//! Member groups: the failure domains replicas must be spread across.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use super::error::ClusterError;
use super::membership::{Member, MemberId};

/// Strategy used to derive a member's group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionGroupType {
    /// Explicit interface lists; members matching none fall back to their zone.
    Custom,
    /// The zone label reported by discovery.
    ZoneAware,
    /// The member's host address.
    HostAware,
    /// Every member is its own group.
    PerMember,
}

impl FromStr for PartitionGroupType {
    type Err = ClusterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "CUSTOM" => Ok(Self::Custom),
            "ZONE_AWARE" | "ZONE" => Ok(Self::ZoneAware),
            "HOST_AWARE" | "HOST" => Ok(Self::HostAware),
            "PER_MEMBER" | "MEMBER" => Ok(Self::PerMember),
            _ => Err(ClusterError::config(format!(
                "unknown partition group type '{value}'"
            ))),
        }
    }
}

impl fmt::Display for PartitionGroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Custom => "CUSTOM",
            Self::ZoneAware => "ZONE_AWARE",
            Self::HostAware => "HOST_AWARE",
            Self::PerMember => "PER_MEMBER",
        })
    }
}

/// Name of a member group. Ordered so that placement can break ties.
///
/// Keys of configured interface lists live in their own namespace, so no zone
/// label, host or member id can ever equal one of them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    interface_list: bool,
    name: String,
}

impl GroupKey {
    /// Wrap a group name derived from member metadata.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            interface_list: false,
            name: name.into(),
        }
    }

    /// Key of the `index`-th configured interface list.
    #[must_use]
    pub fn interface_list(index: usize) -> Self {
        Self {
            interface_list: true,
            name: format!("interfaces#{index}"),
        }
    }

    /// Borrow the group name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Returns `true` for keys of configured interface lists.
    #[must_use]
    pub const fn is_interface_list(&self) -> bool {
        self.interface_list
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OctetPattern {
    Any,
    Exact(u8),
    Range(u8, u8),
}

impl OctetPattern {
    fn parse(part: &str) -> Option<Self> {
        if part == "*" {
            return Some(Self::Any);
        }
        if let Some((low, high)) = part.split_once('-') {
            let low = low.parse::<u8>().ok()?;
            let high = high.parse::<u8>().ok()?;
            return (low <= high).then_some(Self::Range(low, high));
        }
        part.parse::<u8>().ok().map(Self::Exact)
    }

    const fn matches(self, octet: u8) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(value) => value == octet,
            Self::Range(low, high) => low <= octet && octet <= high,
        }
    }
}

/// IPv4 interface pattern such as `10.10.1.*` or `10.10.1.100-110`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfacePattern {
    source: String,
    octets: [OctetPattern; 4],
}

impl InterfacePattern {
    /// Returns `true` when `address` falls inside the pattern.
    #[must_use]
    pub fn matches(&self, address: IpAddr) -> bool {
        match address {
            IpAddr::V4(v4) => self
                .octets
                .iter()
                .zip(v4.octets())
                .all(|(pattern, octet)| pattern.matches(octet)),
            IpAddr::V6(_) => false,
        }
    }
}

impl FromStr for InterfacePattern {
    type Err = ClusterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let invalid =
            || ClusterError::config(format!("malformed interface pattern '{trimmed}'"));
        let parts: Vec<_> = trimmed.split('.').collect();
        if parts.len() != 4 {
            return Err(invalid());
        }
        let mut octets = [OctetPattern::Any; 4];
        for (slot, part) in octets.iter_mut().zip(parts) {
            *slot = OctetPattern::parse(part).ok_or_else(invalid)?;
        }
        Ok(Self {
            source: trimmed.to_string(),
            octets,
        })
    }
}

impl fmt::Display for InterfacePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// One configured member group defined by interface patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceGroup {
    key: GroupKey,
    patterns: Vec<InterfacePattern>,
}

impl InterfaceGroup {
    /// Parse the `index`-th comma-separated interface list.
    pub fn parse(index: usize, list: &str) -> Result<Self, ClusterError> {
        let patterns = list
            .split(',')
            .map(str::trim)
            .map(|entry| {
                if entry.is_empty() {
                    Err(ClusterError::config(format!(
                        "empty entry in partition group list #{index} ('{list}')"
                    )))
                } else {
                    entry.parse()
                }
            })
            .collect::<Result<Vec<InterfacePattern>, _>>()?;
        Ok(Self {
            key: GroupKey::interface_list(index),
            patterns,
        })
    }

    /// Group name assigned to matching members.
    #[must_use]
    pub const fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Returns `true` when any pattern matches `address`.
    #[must_use]
    pub fn matches(&self, address: IpAddr) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(address))
    }
}

/// Resolved grouping rule shared by the placement planner and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberGrouping {
    enabled: bool,
    group_type: PartitionGroupType,
    interface_groups: Vec<InterfaceGroup>,
}

impl MemberGrouping {
    /// Create a grouping rule.
    #[must_use]
    pub const fn new(
        enabled: bool,
        group_type: PartitionGroupType,
        interface_groups: Vec<InterfaceGroup>,
    ) -> Self {
        Self {
            enabled,
            group_type,
            interface_groups,
        }
    }

    /// Zone-aware grouping, the common case in tests and simulations.
    #[must_use]
    pub const fn zone_aware() -> Self {
        Self::new(true, PartitionGroupType::ZoneAware, Vec::new())
    }

    /// Configured group type.
    #[must_use]
    pub const fn group_type(&self) -> PartitionGroupType {
        self.group_type
    }

    /// The single group `member` belongs to.
    #[must_use]
    pub fn group_of(&self, member: &Member) -> GroupKey {
        if !self.enabled {
            return GroupKey::new(member.id.as_str());
        }
        match self.group_type {
            PartitionGroupType::ZoneAware => GroupKey::new(member.zone.as_str()),
            PartitionGroupType::HostAware => GroupKey::new(member.address.ip().to_string()),
            PartitionGroupType::PerMember => GroupKey::new(member.id.as_str()),
            PartitionGroupType::Custom => self
                .interface_groups
                .iter()
                .find(|group| group.matches(member.address.ip()))
                .map_or_else(
                    || GroupKey::new(member.zone.as_str()),
                    |group| group.key().clone(),
                ),
        }
    }

    /// Partition `members` into groups, each member listed exactly once.
    #[must_use]
    pub fn groups<'a>(
        &self,
        members: impl IntoIterator<Item = &'a Member>,
    ) -> BTreeMap<GroupKey, Vec<MemberId>> {
        let mut groups: BTreeMap<GroupKey, Vec<MemberId>> = BTreeMap::new();
        for member in members {
            groups
                .entry(self.group_of(member))
                .or_default()
                .push(member.id.clone());
        }
        groups
    }
}
