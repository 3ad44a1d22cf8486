//! Client configuration management.
//!
//! Holds the backend URL, the last email used to log in, and which storage
//! backend keeps the session credentials.
//!
//! Configuration is stored at `~/.config/techblog/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialStore, FileBackend, KeyringBackend, MemoryBackend, StorageBackend};
use crate::cache::QueryCache;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "techblog";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the backend URL
pub const API_URL_ENV: &str = "TECHBLOG_API_URL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How long a cached query stays fresh.
const DEFAULT_CACHE_STALE_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackendKind {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub last_email: Option<String>,
    /// `file` keeps entries under the cache dir with owner-only permissions.
    /// If clearing them fails at sign-out they survive a restart until the
    /// next successful logout or login. `memory` lasts one process only.
    pub credential_backend: CredentialBackendKind,
    pub request_timeout_secs: u64,
    pub cache_stale_secs: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            last_email: None,
            credential_backend: CredentialBackendKind::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cache_stale_secs: DEFAULT_CACHE_STALE_SECS,
        }
    }
}

impl Config {
    /// Load from disk (defaults if absent), then apply the environment override.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                config.api_base_url = url;
            }
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
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

    /// Credential store backed by the configured storage.
    pub fn credential_store(&self) -> Result<CredentialStore> {
        let backend: Arc<dyn StorageBackend> = match self.credential_backend {
            CredentialBackendKind::File => {
                Arc::new(FileBackend::new(self.cache_dir()?.join("credentials"))?)
            }
            CredentialBackendKind::Keyring => Arc::new(KeyringBackend::new()),
            CredentialBackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        Ok(CredentialStore::new(backend))
    }

    pub fn query_cache(&self) -> QueryCache {
        QueryCache::with_stale_after(chrono::Duration::seconds(self.cache_stale_secs.max(0)))
    }
}
