//! Configuration system for DAGFS.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $DAGFS_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/dagfs/config.toml
//!   3. ~/.config/dagfs/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::DEFAULT_GET_BUF_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DagfsConfig {
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session label, reported in logs.
    pub label: String,
    /// Communication buffer size in bytes. Rounded up to whole pages.
    pub tx_buf_size: u64,
    /// RAM quota donated to the session. 0 = the minimum for tx_buf_size.
    pub ram_quota: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Disk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root of the on-disk block store. Ignored by the memory backend.
    pub path: PathBuf,
    /// Max stored bytes. 0 = unlimited.
    pub capacity_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Reject PUTs whose bytes do not hash to their digest CID.
    pub verify_cids: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            label: "dagfs".to_string(),
            tx_buf_size: DEFAULT_GET_BUF_SIZE as u64,
            ram_quota: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Disk,
            path: data_dir().join("blocks"),
            capacity_bytes: 0,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("dagfs")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("dagfs")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl DagfsConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            DagfsConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("DAGFS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&DagfsConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply DAGFS_* overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("DAGFS_SESSION__LABEL") {
            self.session.label = v;
        }
        if let Some(v) = lookup("DAGFS_SESSION__TX_BUF_SIZE") {
            if let Ok(n) = v.parse() {
                self.session.tx_buf_size = n;
            }
        }
        if let Some(v) = lookup("DAGFS_STORAGE__BACKEND") {
            match v.as_str() {
                "memory" => self.storage.backend = StorageBackend::Memory,
                "disk" => self.storage.backend = StorageBackend::Disk,
                _ => {}
            }
        }
        if let Some(v) = lookup("DAGFS_STORAGE__PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DAGFS_STORAGE__CAPACITY_BYTES") {
            if let Ok(n) = v.parse() {
                self.storage.capacity_bytes = n;
            }
        }
        if let Some(v) = lookup("DAGFS_SERVER__VERIFY_CIDS") {
            self.server.verify_cids = v == "true" || v == "1";
        }
    }
}
