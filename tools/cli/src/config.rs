//! CLI configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use tasksync_sync::SyncConfig;

/// Which remote provider to use and how to configure it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Registered provider name ("file", "memory", "offline").
    pub provider: String,
    /// Provider-specific configuration.
    #[serde(default)]
    pub config: Value,
}

/// Contents of `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Local SQLite database.
    pub database_path: PathBuf,
    /// Signed-in principal; `None` means signed out.
    pub owner: Option<String>,
    pub remote: RemoteSettings,
    pub sync: SyncConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            database_path: data.join("tasks.db"),
            owner: None,
            remote: RemoteSettings {
                provider: "file".to_string(),
                config: json!({ "root": data.join("remote") }),
            },
            sync: SyncConfig::default(),
        }
    }
}

impl AppConfig {
    /// `<config_dir>/tasksync/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tasksync").join("config.json"))
    }

    /// Load the configuration; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tasksync")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tasksync_sync::SyncMode;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig::load(&temp.path().join("config.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.remote.provider, "file");
        assert!(config.owner.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "owner": "alice",
                "remote": { "provider": "offline" },
                "sync": { "sync_mode": { "Periodic": { "interval": { "secs": 5, "nanos": 0 } } } }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.owner.as_deref(), Some("alice"));
        assert_eq!(config.remote.provider, "offline");
        assert_eq!(config.remote.config, Value::Null);
        assert_eq!(
            config.sync.sync_mode,
            SyncMode::Periodic {
                interval: Duration::from_secs(5)
            }
        );
        assert_eq!(config.sync.push_concurrency, 4);
        assert_eq!(config.database_path, AppConfig::default().database_path);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
