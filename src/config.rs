use crate::error::{HistoryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration settings for the query history store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Custom data directory (if not using system default)
    pub data_dir: Option<PathBuf>,

    /// Which backend the front-end should talk to
    #[serde(default)]
    pub backend: BackendKind,

    /// Local key/value backed store settings
    #[serde(default)]
    pub local: LocalConfig,

    /// Remote query history API settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Known data sources, used to resolve names to uids and back
    #[serde(default)]
    pub datasources: Vec<DatasourceConfig>,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
}

/// What to do when a query identical to a stored one is added again
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Move the existing entry to the head and bump its timestamps
    #[default]
    Refresh,
    /// Fail with `DuplicatedEntry`
    Reject,
}

/// Local store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Hard cap on stored entries; only starred entries may exceed it
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Retention period used when none has been saved in settings
    #[serde(default = "default_retention_days")]
    pub default_retention_days: u32,

    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Byte quota for the file backed key/value store
    pub storage_quota_bytes: Option<u64>,

    /// Fixed UTC offset for day boundaries; the host timezone when unset
    pub utc_offset_secs: Option<i32>,
}

/// Remote API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Page size sent as `limit`
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// A data source known to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub name: String,
    pub uid: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            backend: BackendKind::default(),
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
            datasources: Vec::new(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            default_retention_days: default_retention_days(),
            duplicate_policy: DuplicatePolicy::default(),
            storage_quota_bytes: None,
            utc_offset_secs: None,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
            timeout_secs: default_timeout(),
        }
    }
}

impl LocalConfig {
    /// Resolve the configured offset, rejecting values chrono cannot represent
    pub fn utc_offset(&self) -> Result<Option<chrono::FixedOffset>> {
        match self.utc_offset_secs {
            None => Ok(None),
            Some(secs) => chrono::FixedOffset::east_opt(secs).map(Some).ok_or_else(|| {
                HistoryError::Configuration(format!("utc_offset_secs out of range: {}", secs))
            }),
        }
    }
}

impl Config {
    /// Load configuration from file, with fallback to defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            // Create default config file
            let config = Self::default();
            config.save_to_file(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            HistoryError::Configuration(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            HistoryError::Configuration(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = crate::ensure_data_dir()?;
        Ok(data_dir.join("config.toml"))
    }

    /// Load configuration from the default location
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from_file(path)
    }

    /// Data directory, honoring the configured override
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(crate::default_data_dir)
    }

    fn validate(&self) -> Result<()> {
        if self.local.max_items == 0 {
            return Err(HistoryError::Configuration(
                "local.max_items must be at least 1".to_string(),
            ));
        }
        if self.remote.page_size == 0 {
            return Err(HistoryError::Configuration(
                "remote.page_size must be at least 1".to_string(),
            ));
        }
        self.local.utc_offset()?;
        url::Url::parse(&self.remote.base_url)?;
        Ok(())
    }
}

// Helper functions for default values
fn default_max_items() -> usize {
    crate::history::MAX_HISTORY_ITEMS
}

fn default_retention_days() -> u32 {
    crate::history::DEFAULT_RETENTION_DAYS
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout() -> u64 {
    30
}
