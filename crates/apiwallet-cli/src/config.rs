//! Configuration loading.
//!
//! Reads `config/default.toml` (or the `--config` path) and then applies
//! environment overrides. A missing file means defaults; a malformed one is
//! an error.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use apiwallet_vault::Platform;
use serde::Deserialize;

const ENV_DATA_DIR: &str = "APIWALLET_DATA_DIR";
const ENV_CACHE_TTL_SECS: &str = "APIWALLET_CACHE_TTL_SECS";
const ENV_HTTP_TIMEOUT_SECS: &str = "APIWALLET_HTTP_TIMEOUT_SECS";

/// File name of the SQLite store inside the data directory.
pub const DB_FILE_NAME: &str = "apiwallet.db";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvidersConfig {
    /// Provider id to base URL.
    pub base_urls: BTreeMap<String, String>,
}

impl AppConfig {
    /// Load `path` and apply overrides from the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content)
                .with_context(|| format!("failed to parse config {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read config {}", path.display()));
            }
        };
        config.apply_env(crate::helpers::env_non_empty)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides, reading variables through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(ttl) = lookup(ENV_CACHE_TTL_SECS) {
            self.cache.ttl_secs = parse_secs(ENV_CACHE_TTL_SECS, &ttl)?;
        }
        if let Some(timeout) = lookup(ENV_HTTP_TIMEOUT_SECS) {
            self.http.timeout_secs = parse_secs(ENV_HTTP_TIMEOUT_SECS, &timeout)?;
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage.data_dir.join(DB_FILE_NAME)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Base URL overrides keyed by platform. Unknown provider ids are an
    /// error rather than silently ignored.
    pub fn base_url_overrides(&self) -> Result<HashMap<Platform, String>> {
        self.providers
            .base_urls
            .iter()
            .map(|(id, url)| -> Result<(Platform, String)> {
                let platform = id
                    .parse::<Platform>()
                    .with_context(|| format!("[providers.base_urls] names unknown provider `{id}`"))?;
                Ok((platform, url.clone()))
            })
            .collect()
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(0) => bail!("{name} must be greater than zero"),
        Ok(secs) => Ok(secs),
        Err(e) => Err(e).with_context(|| format!("{name}={raw} is not a number of seconds")),
    }
}
