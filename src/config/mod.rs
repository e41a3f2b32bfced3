//! Session configuration.
//!
//! [`Settings`] is read once at startup from a TOML file and decides where
//! the store, the download cache and the registries live, and whether the
//! session evaluates in pure mode. Paths may use `~` and `$VAR`.
//!
//! ```toml
//! pure_eval = false
//! restrict_eval = false
//! tarball_ttl = 3600
//! store_dir = "~/.local/share/flakelock/store"
//! user_registry = "$HOME/.config/flakelock/registry.json"
//! ```
//!
//! Lookup order for the file is: explicit path (`--config`), the
//! `FLAKELOCK_CONFIG` environment variable, then `~/.config/flakelock/config.toml`.
//! A missing file yields [`Settings::default`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::constants::DEFAULT_TARBALL_TTL;
use crate::utils::platform::resolve_path;

const fn default_tarball_ttl() -> u64 {
    DEFAULT_TARBALL_TTL.as_secs()
}

/// Settings for one resolution session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Forbid fetching mutable references and skip the on-disk registries.
    #[serde(default)]
    pub pure_eval: bool,

    /// Track every fetched source as an allowed path for the evaluator.
    #[serde(default)]
    pub restrict_eval: bool,

    /// Cache lifetime in seconds for tarballs of mutable refs.
    #[serde(default = "default_tarball_ttl")]
    pub tarball_ttl: u64,

    /// Content-addressed store directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<String>,

    /// Download and mirror cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,

    /// Base data directory; the local registry lives below it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Per-user registry file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_registry: Option<String>,

    /// Optional global registry file, consulted before all others.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_registry: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pure_eval: false,
            restrict_eval: false,
            tarball_ttl: default_tarball_ttl(),
            store_dir: None,
            cache_dir: None,
            data_dir: None,
            user_registry: None,
            global_registry: None,
        }
    }
}

impl Settings {
    /// Load settings from an explicit path, `FLAKELOCK_CONFIG`, or the default location.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => match std::env::var("FLAKELOCK_CONFIG") {
                Ok(path) => PathBuf::from(path),
                Err(_) => Self::default_path()?,
            },
        };

        if path.exists() {
            Self::load_from(&path).await
        } else {
            tracing::debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load settings from a specific file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration from {}", path.display()))
    }

    /// Default configuration file location.
    pub fn default_path() -> Result<PathBuf> {
        Ok(config_home()?.join("flakelock").join("config.toml"))
    }

    /// Cache lifetime for mutable tarball downloads.
    #[must_use]
    pub const fn tarball_ttl(&self) -> Duration {
        Duration::from_secs(self.tarball_ttl)
    }

    /// Store directory: `FLAKELOCK_STORE_DIR`, then `store_dir`, then `<data dir>/flakelock/store`.
    pub fn store_dir(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("FLAKELOCK_STORE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        match &self.store_dir {
            Some(dir) => resolve_path(dir),
            None => Ok(self.data_dir()?.join("flakelock").join("store")),
        }
    }

    /// Cache directory: `FLAKELOCK_CACHE_DIR`, then `cache_dir`, then the platform cache dir.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("FLAKELOCK_CACHE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        match &self.cache_dir {
            Some(dir) => resolve_path(dir),
            None => Ok(dirs::cache_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine cache directory"))?
                .join("flakelock")),
        }
    }

    /// Base data directory.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => resolve_path(dir),
            None => dirs::data_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine data directory")),
        }
    }

    /// Per-user registry file.
    pub fn user_registry_path(&self) -> Result<PathBuf> {
        match &self.user_registry {
            Some(path) => resolve_path(path),
            None => Ok(config_home()?.join("flakelock").join("registry.json")),
        }
    }

    /// Local (machine-wide) registry file below the data directory.
    pub fn local_registry_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("flakelock").join("flake-registry.json"))
    }

    /// Global registry file, when one is configured.
    pub fn global_registry_path(&self) -> Result<Option<PathBuf>> {
        self.global_registry.as_deref().map(resolve_path).transpose()
    }
}

fn config_home() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
        .join(".config"))
}
