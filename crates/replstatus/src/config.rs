//! Configuration loading for the replication status service.

use crate::error::StatusError;
use crate::remote::{NamingStyle, RemoteDestinationConfig, RemoteRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bounds for the in-memory status cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of (project, destination, ref) entries kept.
    pub max_entries: usize,
    /// Entries older than this are treated as absent. `None` disables expiry.
    pub max_age_secs: Option<u64>,
    /// Number of independently locked shards.
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            max_age_secs: None,
            shards: 16,
        }
    }
}

impl CacheConfig {
    /// Expiry as a [`Duration`].
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

/// Optional local persistence of cache writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path of the append-only journal file.
    pub journal_path: PathBuf,
}

/// One `[remote.<name>]` stanza as written in the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteStanza {
    /// URL templates.
    pub url: Vec<String>,
    /// Project filter patterns.
    pub projects: Vec<String>,
    /// `slash`, `dash`, `underscore` or `basenameOnly`.
    #[serde(rename = "remoteNameStyle")]
    pub remote_name_style: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Identifier of the local node; events from other nodes are discarded.
    pub instance_id: Option<String>,
    /// Cache bounds.
    pub cache: CacheConfig,
    /// Local journal, if any.
    pub persistence: Option<PersistenceConfig>,
    /// Remote stanzas by name.
    pub remote: BTreeMap<String, RemoteStanza>,
}

impl StatusConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self, StatusError> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Self::from_toml(&contents),
            "json" => serde_json::from_str(&contents).map_err(|e| StatusError::ConfigParse {
                msg: e.to_string(),
            }),
            _ => Err(StatusError::UnsupportedConfigFormat {
                ext: ext.to_string(),
            }),
        }
    }

    /// Parse TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, StatusError> {
        toml::from_str(contents).map_err(|e| StatusError::ConfigParse {
            msg: e.to_string(),
        })
    }

    /// Local node identifier, with an empty string treated as unset.
    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Validate the remote stanzas and build the registry.
    ///
    /// Stanzas without URLs are skipped. Any invalid stanza fails the whole load.
    pub fn remotes(&self) -> Result<RemoteRegistry, StatusError> {
        if self.remote.is_empty() {
            tracing::warn!("replication config has no remote stanzas");
            return Ok(RemoteRegistry::default());
        }

        let mut remotes = Vec::with_capacity(self.remote.len());
        for (name, stanza) in &self.remote {
            if stanza.url.is_empty() {
                tracing::debug!(remote = %name, "skipping remote without url");
                continue;
            }
            let style = stanza
                .remote_name_style
                .as_deref()
                .map(NamingStyle::from_config)
                .unwrap_or_default();
            remotes.push(RemoteDestinationConfig::new(
                name.clone(),
                stanza.url.clone(),
                &stanza.projects,
                style,
            )?);
        }
        Ok(RemoteRegistry::new(remotes))
    }
}
