use serde::Deserialize;
use tracing::debug;

use super::error::ClusterError;
use super::grouping::{InterfaceGroup, MemberGrouping, PartitionGroupType};
use super::merge::MergePolicy;
use super::quorum::{QuorumPolicy, QuorumType};
use super::security::{SymmetricEncryptionConfig, TransportSecurityConfig};

/// Upper bound on synchronous backups per partition.
pub const MAX_BACKUP_COUNT: i64 = 6;

/// Partition count used when none is configured.
pub const DEFAULT_PARTITION_COUNT: u32 = 271;

/// Declarative grid configuration as loaded from TOML.
///
/// Every field is defaulted so an empty document is a valid configuration.
/// Policy names are kept as strings here and resolved exactly once by
/// [`GridConfig::resolve`]; nothing downstream dispatches on strings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Logical cluster name, used for logging and diagnostics.
    pub cluster_name: String,
    /// Whether members are located through the pluggable discovery feed.
    pub discovery_enabled: bool,
    /// Whether multicast join is enabled. Discovery replaces it by default.
    pub multicast_enabled: bool,
    /// Name of the quorum policy guarding the data map.
    pub quorum_name: String,
    /// Minimum live members required for quorum.
    pub quorum_size: usize,
    /// Operations protected by the quorum (`READ`, `WRITE`, `READ_WRITE`).
    pub quorum_type: String,
    /// Fixed number of partitions, chosen at cluster creation.
    pub partition_count: u32,
    /// Whether partition grouping is applied at all.
    pub partition_group_enabled: bool,
    /// Member grouping strategy (`CUSTOM`, `ZONE_AWARE`, `HOST_AWARE`, `PER_MEMBER`).
    pub partition_group_type: String,
    /// Ordered comma-separated interface lists, one member group each.
    pub partition_group_ip_lists: Vec<String>,
    /// Split-brain merge policy name.
    pub merge_policy: String,
    /// Backups per partition. Signed so that negative input can be reported.
    pub backup_count: i64,
    /// Name of the replicated data map.
    pub map_name: String,
    /// Settings handed to the transport-security collaborator.
    pub transport_security: TransportSecurityConfig,
    /// Settings handed to the symmetric-encryption collaborator.
    pub symmetric_encryption: SymmetricEncryptionConfig,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cluster_name: "dev".to_string(),
            discovery_enabled: true,
            multicast_enabled: false,
            quorum_name: "AT_LEAST_TWO_NODES".to_string(),
            quorum_size: 2,
            quorum_type: "READ_WRITE".to_string(),
            partition_count: DEFAULT_PARTITION_COUNT,
            partition_group_enabled: true,
            partition_group_type: "CUSTOM".to_string(),
            partition_group_ip_lists: Vec::new(),
            merge_policy: "ADD_NEW_ENTRY".to_string(),
            backup_count: 1,
            map_name: "pnl".to_string(),
            transport_security: TransportSecurityConfig::default(),
            symmetric_encryption: SymmetricEncryptionConfig::default(),
        }
    }
}

impl GridConfig {
    /// Parse a TOML document, filling omitted fields with defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ClusterError> {
        toml::from_str(contents).map_err(|err| ClusterError::config(err.to_string()))
    }

    /// Validate the configuration and resolve every named policy.
    pub fn resolve(self) -> Result<GridSettings, ClusterError> {
        if self.cluster_name.trim().is_empty() {
            return Err(ClusterError::config("cluster_name must not be empty"));
        }
        if self.partition_count == 0 {
            return Err(ClusterError::config("partition_count must be at least 1"));
        }
        if self.backup_count < 0 {
            return Err(ClusterError::config(format!(
                "backup_count must not be negative (got {})",
                self.backup_count
            )));
        }
        if self.backup_count > MAX_BACKUP_COUNT {
            return Err(ClusterError::config(format!(
                "backup_count {} exceeds the maximum of {MAX_BACKUP_COUNT}",
                self.backup_count
            )));
        }
        if self.quorum_size == 0 {
            return Err(ClusterError::config("quorum_size must be at least 1"));
        }
        if self.quorum_name.trim().is_empty() {
            return Err(ClusterError::config("quorum_name must not be empty"));
        }
        if !self.discovery_enabled && !self.multicast_enabled {
            return Err(ClusterError::config(
                "either discovery or multicast join must be enabled",
            ));
        }

        let quorum_type: QuorumType = self.quorum_type.parse()?;
        let merge_policy: MergePolicy = self.merge_policy.parse()?;
        let group_type: PartitionGroupType = self.partition_group_type.parse()?;
        let interface_groups = self
            .partition_group_ip_lists
            .iter()
            .enumerate()
            .map(|(index, list)| InterfaceGroup::parse(index, list))
            .collect::<Result<Vec<_>, _>>()?;

        self.transport_security.validate()?;
        self.symmetric_encryption.validate()?;

        let backup_count = usize::try_from(self.backup_count)
            .map_err(|_| ClusterError::config("backup_count out of range"))?;

        debug!(
            cluster = %self.cluster_name,
            partitions = self.partition_count,
            backup_count,
            merge_policy = %merge_policy,
            group_type = %group_type,
            "resolved grid configuration"
        );

        Ok(GridSettings {
            cluster_name: self.cluster_name,
            discovery_enabled: self.discovery_enabled,
            multicast_enabled: self.multicast_enabled,
            partition_count: self.partition_count,
            backup_count,
            map_name: self.map_name,
            quorum: QuorumPolicy::new(self.quorum_name, self.quorum_size, quorum_type),
            merge_policy,
            grouping: MemberGrouping::new(
                self.partition_group_enabled,
                group_type,
                interface_groups,
            ),
            transport_security: self.transport_security,
            symmetric_encryption: self.symmetric_encryption,
        })
    }
}

/// Validated configuration, built once and passed by reference to every component.
#[derive(Debug)]
pub struct GridSettings {
    /// Logical cluster name.
    pub cluster_name: String,
    /// Discovery-based join enabled.
    pub discovery_enabled: bool,
    /// Multicast join enabled.
    pub multicast_enabled: bool,
    /// Fixed partition count.
    pub partition_count: u32,
    /// Backups per partition.
    pub backup_count: usize,
    /// Name of the replicated data map.
    pub map_name: String,
    /// Resolved quorum policy.
    pub quorum: QuorumPolicy,
    /// Resolved split-brain merge policy.
    pub merge_policy: MergePolicy,
    /// Resolved member grouping.
    pub grouping: MemberGrouping,
    /// Opaque transport-security record.
    pub transport_security: TransportSecurityConfig,
    /// Opaque symmetric-encryption record.
    pub symmetric_encryption: SymmetricEncryptionConfig,
}

impl GridSettings {
    /// Replica slots per partition (primary plus backups).
    #[must_use]
    pub const fn replica_count(&self) -> usize {
        self.backup_count + 1
    }
}
