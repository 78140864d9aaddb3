use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::providers::{Endpoints, ProviderKind};

const CONFIG_ENV: &str = "PORTAL_INGEST_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "portal-ingestion.toml";
const APP_DIR: &str = "portal-ingestion";

fn default_poll_interval_hours() -> f64 {
    6.0
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub username: String,
    pub password: String,
    /// Pre-obtained one-time code for unattended runs.
    #[serde(default)]
    pub one_time_code: Option<String>,
    #[serde(default)]
    pub portal_base_url: Option<String>,
    #[serde(default)]
    pub opower_base_url: Option<String>,
}

impl ProviderConfig {
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            portal_base_url: self.portal_base_url.clone(),
            opower_base_url: self.opower_base_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join(APP_DIR))
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|d| d.join(APP_DIR))
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_poll_interval_hours")]
    pub poll_interval_hours: f64,
    /// Treat an empty fetch as a failed cycle even when merging.
    #[serde(default)]
    pub fail_on_empty: bool,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    /// Loads from `path`, else `$PORTAL_INGEST_CONFIG`, else `portal-ingestion.toml`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        use std::env;

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => env::var(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.provider.username.trim().is_empty() {
            anyhow::bail!("provider.username must not be empty");
        }
        if self.provider.password.is_empty() {
            anyhow::bail!("provider.password must not be empty");
        }
        if !(self.poll_interval_hours.is_finite() && self.poll_interval_hours > 0.0) {
            anyhow::bail!("poll_interval_hours must be a positive number");
        }
        if Duration::try_from_secs_f64(self.poll_interval_hours * 3600.0).is_err() {
            anyhow::bail!("poll_interval_hours is too large");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_hours * 3600.0).unwrap_or(Duration::MAX)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}
