use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use zonegrid_core::cluster::{GridConfig, GridSettings, SeedMember};

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Loads and resolves grid configuration from a TOML file.
pub struct ConfigManager {
    path: Option<PathBuf>,
    settings: GridSettings,
}

impl ConfigManager {
    /// Resolve the bundled defaults.
    pub fn defaults() -> Result<Self> {
        let settings = resolve(DEFAULT_CONFIG).context("bundled default config is invalid")?;
        Ok(Self {
            path: None,
            settings,
        })
    }

    /// Load `path`, falling back to the bundled defaults when it does not exist.
    pub fn load_with_path<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            let mut manager = Self::defaults()?;
            manager.path = Some(path);
            return Ok(manager);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let settings =
            resolve(&contents).with_context(|| format!("invalid config at {}", path.display()))?;
        Ok(Self {
            path: Some(path),
            settings,
        })
    }

    /// Resolved settings.
    #[must_use]
    pub const fn settings(&self) -> &GridSettings {
        &self.settings
    }

    /// File the settings were requested from, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn resolve(contents: &str) -> Result<GridSettings> {
    let config = GridConfig::from_toml_str(contents)?;
    Ok(config.resolve()?)
}

/// Member roster file: a list of `[[members]]` tables.
#[derive(Debug, Deserialize)]
pub struct Roster {
    /// Listed members in file order.
    #[serde(default)]
    pub members: Vec<SeedMember>,
}

impl Roster {
    /// Read and sanity-check a roster file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read roster at {}", path.display()))?;
        let roster: Self = toml::from_str(&contents)
            .with_context(|| format!("invalid roster at {}", path.display()))?;

        let mut seen = BTreeSet::new();
        for member in &roster.members {
            let key = member.id.clone().unwrap_or_else(|| member.address.clone());
            if !seen.insert(key.clone()) {
                bail!("duplicate member '{key}' in roster {}", path.display());
            }
        }
        Ok(roster)
    }
}

/// Human-readable summary of resolved settings.
#[must_use]
pub fn format_settings(settings: &GridSettings) -> Vec<String> {
    vec![
        format!("cluster_name={}", settings.cluster_name),
        format!(
            "join=discovery:{} multicast:{}",
            settings.discovery_enabled, settings.multicast_enabled
        ),
        format!(
            "quorum={} (min {}, guards {})",
            settings.quorum.name(),
            settings.quorum.min_size(),
            settings.quorum.protects()
        ),
        format!(
            "partitions={} backups={}",
            settings.partition_count, settings.backup_count
        ),
        format!("partition_group={}", settings.grouping.group_type()),
        format!("merge_policy={}", settings.merge_policy),
        format!("map={}", settings.map_name),
        format!(
            "tls={} symmetric_encryption={}",
            settings.transport_security.enabled, settings.symmetric_encryption.enabled
        ),
    ]
}
