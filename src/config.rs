//! Application configuration.
//!
//! Layered: built-in defaults, then an optional JSON file (default location
//! `~/.config/stashkeep/config.json`, overridable with `--config`), then
//! `STASHKEEP_*` environment variables. A `.env` file is honored via dotenvy
//! before any of this runs.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "stashkeep";
const CONFIG_FILE: &str = "config.json";
const CACHE_FILE: &str = "cache.db";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tls: TlsConfig,
    pub log: LogConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:8443/api/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Extra root CA in PEM format, for servers with a private PKI.
    pub ca_cert_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Service name the token pair is filed under in the platform keyring.
    pub service: String,
    /// `keyring` or `memory`.
    pub backend: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            service: APP_NAME.to_string(),
            backend: "keyring".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Minutes an entry stays eligible as a network-failure fallback.
    /// Zero or negative disables freshness entirely.
    pub ttl_minutes: i64,
    pub path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_minutes: 180,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub wait_min_ms: u64,
    pub wait_max_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            wait_min_ms: 200,
            wait_max_ms: 2000,
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Loads the file at `path` (or the default location when `None`), then
    /// applies environment overrides. A missing file is not an error; a
    /// present-but-invalid file is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut cfg = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };

        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(dir.join(APP_NAME).join(CONFIG_FILE))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("STASHKEEP_SERVER_URL") {
            self.server.base_url = v;
        }
        if let Ok(v) = env::var("STASHKEEP_CA_CERT") {
            self.tls.ca_cert_path = Some(v);
        }
        if let Ok(v) = env::var("STASHKEEP_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = env::var("STASHKEEP_AUTH_SERVICE") {
            self.auth.service = v;
        }
        if let Ok(v) = env::var("STASHKEEP_AUTH_BACKEND") {
            self.auth.backend = v;
        }
        if let Ok(v) = env::var("STASHKEEP_CACHE_PATH") {
            self.cache.path = Some(v);
        }
        if let Ok(v) = env::var("STASHKEEP_CACHE_TTL_MINUTES") {
            if let Ok(n) = v.parse() {
                self.cache.ttl_minutes = n;
            }
        }
        if let Ok(v) = env::var("STASHKEEP_CACHE_ENABLED") {
            if let Ok(b) = v.parse() {
                self.cache.enabled = b;
            }
        }
        if let Ok(v) = env::var("STASHKEEP_RETRY_MAX") {
            if let Ok(n) = v.parse() {
                self.retry.max_retries = n;
            }
        }
    }

    /// Resolved cache database path: config value, or the platform cache
    /// directory.
    pub fn cache_path(&self) -> Result<PathBuf> {
        if let Some(p) = &self.cache.path {
            return Ok(PathBuf::from(p));
        }
        let dir = dirs::cache_dir().context("could not determine cache directory")?;
        Ok(dir.join(APP_NAME).join(CACHE_FILE))
    }
}
