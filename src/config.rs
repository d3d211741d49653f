use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::registry::StoreRegistry;
use crate::remote::{HttpRemote, RemoteSync};
use crate::service::Lore;
use crate::store_id::STORE_ENV;
use crate::sync::{SyncEngine, SyncSettings, DEFAULT_DELTA_PAGE_SIZE, DEFAULT_PUSH_BATCH_SIZE};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoreConfig {
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    /// Store used when a command names none. Set from `LORE_STORE` only.
    #[serde(skip)]
    pub store_override: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per store.
    pub root: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: String,
    pub token: String,
    /// Sent as `X-Lore-Client` when non-blank.
    pub client_name: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub push_batch_size: usize,
    pub delta_page_size: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = default_lore_dir()
            .join("stores")
            .to_string_lossy()
            .into_owned();
        Self { root }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            client_name: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
            delta_page_size: DEFAULT_DELTA_PAGE_SIZE,
        }
    }
}

/// Returns `~/.lore/`, or `./.lore` when no home directory is known.
pub fn default_lore_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lore")
}

/// Returns the default config file path: `~/.lore/config.toml`
pub fn default_config_path() -> PathBuf {
    default_lore_dir().join("config.toml")
}

impl LoreConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("no config file at {}, using defaults", path.display());
            return Ok(LoreConfig::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents).context("failed to parse config TOML")
    }

    /// Apply overrides from `LORE_DIR`, `LORE_STORE`, `LORE_URL`,
    /// `LORE_TOKEN`, `LORE_CLIENT` and `LORE_LOG_LEVEL`. Blank values are
    /// ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(val) = var("LORE_DIR") {
            self.storage.root = val;
        }
        if let Some(val) = var(STORE_ENV) {
            self.store_override = Some(val);
        }
        if let Some(val) = var("LORE_URL") {
            self.remote.url = val;
        }
        if let Some(val) = var("LORE_TOKEN") {
            self.remote.token = val;
        }
        if let Some(val) = var("LORE_CLIENT") {
            self.remote.client_name = val;
        }
        if let Some(val) = var("LORE_LOG_LEVEL") {
            self.log.level = val;
        }
    }

    /// Resolve the storage root, expanding `~` if needed.
    pub fn resolved_root(&self) -> PathBuf {
        expand_tilde(&self.storage.root)
    }

    /// A remote is configured only when both url and token are set.
    pub fn remote_configured(&self) -> bool {
        !self.remote.url.trim().is_empty() && !self.remote.token.trim().is_empty()
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            push_batch_size: self.sync.push_batch_size.max(1),
            delta_page_size: self.sync.delta_page_size.max(1),
        }
    }

    /// The HTTP remote, or `None` when running offline.
    pub fn build_remote(&self) -> Result<Option<Arc<dyn RemoteSync>>> {
        if !self.remote_configured() {
            return Ok(None);
        }
        let client_name = Some(self.remote.client_name.clone()).filter(|n| !n.trim().is_empty());
        let remote = HttpRemote::new(
            &self.remote.url,
            self.remote.token.trim(),
            client_name,
            Duration::from_secs(self.remote.timeout_secs.max(1)),
        )
        .context("failed to configure remote sync client")?;
        Ok(Some(Arc::new(remote)))
    }

    /// Compose the facade this configuration describes.
    pub fn build(&self) -> Result<Lore> {
        let engine = SyncEngine::new(self.build_remote()?, self.sync_settings());
        let registry = StoreRegistry::new(self.resolved_root());
        Ok(Lore::new(registry, engine).with_store_override(self.store_override.clone()))
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
