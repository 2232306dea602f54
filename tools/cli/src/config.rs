//! CLI configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use spotsync_remote::GatewayConfig;
use spotsync_sync::SyncConfig;

const APP_DIR: &str = "spotsync";

/// Settings read from `config.json`, all optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Local cache database. Defaults to `<data dir>/spotsync/spotsync.db`.
    pub database_path: PathBuf,
    pub gateway: GatewayConfig,
    pub sync: SyncConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: data_dir().join("spotsync.db"),
            gateway: GatewayConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load the config file, or the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }
}

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(data_dir)
        .join("config.json")
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotsync_sync::SyncMode;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.database_path.ends_with("spotsync.db"));
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "database_path": "/tmp/cache.db",
                "gateway": {"base_url": "https://spots.example.com/api/", "api_token": "t0k"},
                "sync": {"mode": {"periodic": {"interval_secs": 900}}}
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/cache.db"));
        assert_eq!(config.gateway.api_token.as_deref(), Some("t0k"));
        assert_eq!(config.gateway.timeout_secs, GatewayConfig::default().timeout_secs);
        assert_eq!(config.sync.mode, SyncMode::Periodic { interval_secs: 900 });
        assert!(config.sync.sync_on_reconnect);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
