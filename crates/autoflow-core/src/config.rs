//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, refresh timing, request timeout, where tokens are stored and the
//! last email used to log in.
//!
//! Configuration is stored at `~/.config/autoflow/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::auth::{
    FileTokenStore, KeyringTokenStore, MemoryTokenStore, RefreshSettings, TokenStore,
    DEFAULT_REFRESH_LEAD_SECS,
};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "autoflow";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "AUTOFLOW_API_URL";

const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";

/// HTTP request timeout in seconds.
/// Also bounds how long refresh waiters can hang on a stalled refresh call.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound for the refresh lead and the magnitude of the clock skew
const MAX_ADJUSTMENT_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenStorage {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub refresh_lead_secs: i64,
    pub clock_skew_secs: i64,
    pub request_timeout_secs: u64,
    pub token_storage: TokenStorage,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            refresh_lead_secs: DEFAULT_REFRESH_LEAD_SECS,
            clock_skew_secs: 0,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            token_storage: TokenStorage::default(),
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment overrides (`AUTOFLOW_API_URL`)
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Refresh timing from the config. Out-of-range values are clamped to a day.
    pub fn refresh_settings(&self) -> RefreshSettings {
        let lead = self.refresh_lead_secs.clamp(0, MAX_ADJUSTMENT_SECS);
        let skew = self
            .clock_skew_secs
            .clamp(-MAX_ADJUSTMENT_SECS, MAX_ADJUSTMENT_SECS);
        RefreshSettings {
            lead_time: Duration::seconds(lead),
            clock_skew: Duration::seconds(skew),
        }
    }

    /// Build the token store selected by `token_storage`
    pub fn token_store(&self) -> Result<Arc<dyn TokenStore>> {
        Ok(match self.token_storage {
            TokenStorage::File => Arc::new(FileTokenStore::new(self.cache_dir()?)),
            TokenStorage::Keyring => Arc::new(KeyringTokenStore::new()),
            TokenStorage::Memory => Arc::new(MemoryTokenStore::new()),
        })
    }
}
