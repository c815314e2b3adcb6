use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::warn;

use crate::{
    cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL},
    model::{DEFAULT_FORECAST_DAYS, MAX_FORECAST_DAYS},
    provider::ProviderId,
    retry::RetryPolicy,
};

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
}

/// Tuning knobs of the aggregation engine.
///
/// Example TOML:
/// [engine]
/// cache_ttl_secs = 300
/// max_forecast_days = 7
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    /// Bound on one HTTP attempt against a provider.
    pub http_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub max_forecast_days: u8,
    pub default_forecast_days: u8,
    /// Bound on a whole request, cache wait included.
    pub request_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_TTL.as_secs(),
            cache_max_entries: DEFAULT_MAX_ENTRIES,
            http_timeout_ms: 5_000,
            retry_delay_ms: 300,
            max_forecast_days: MAX_FORECAST_DAYS,
            default_forecast_days: DEFAULT_FORECAST_DAYS,
            request_timeout_ms: 20_000,
        }
    }
}

impl EngineSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// One retry after `retry_delay_ms`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(self.retry_delay_ms))
    }

    /// Worst-case duration of a single provider call, retries included.
    pub fn provider_call_budget(&self) -> Duration {
        self.retry_policy().budget(self.http_timeout())
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Optional primary provider id, e.g. "openweather" or "weatherapi".
    /// It is consulted first and wins merge ties.
    pub default_provider: Option<String>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub engine: EngineSettings,
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        let s = self.default_provider.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "No default provider configured.\n\
                 Hint: run `weather configure <provider>` (e.g. `weather configure openweather`) first."
            )
        })?;

        ProviderId::try_from(s.as_str())
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    /// Configured provider order: the primary provider first, then the rest in
    /// built-in order.
    pub fn provider_order(&self) -> Vec<ProviderId> {
        let primary = self.default_provider_id().ok();

        primary
            .into_iter()
            .chain(ProviderId::all().iter().copied().filter(|id| Some(*id) != primary))
            .collect()
    }

    /// Providers that have credentials, in configured order.
    pub fn active_provider_ids(&self) -> Vec<ProviderId> {
        self.provider_order()
            .into_iter()
            .filter(|id| self.is_provider_configured(*id))
            .collect()
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Load config from disk and apply environment overrides on top.
    pub fn load_with_env() -> Result<Self> {
        let mut cfg = Self::load()?;
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-merge", "weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Applies `OPENWEATHER_API_KEY`, `WEATHERAPI_KEY`, `CACHE_TTL_SECONDS` and
    /// `CACHE_MAXSIZE` from `lookup`. Empty or unparsable values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        for id in ProviderId::all() {
            if let Some(key) = lookup(id.env_key()) {
                let api_key = key.trim().to_string();
                self.providers.insert(id.as_str().to_string(), ProviderConfig { api_key });
            }
        }

        if let Some(raw) = lookup("CACHE_TTL_SECONDS") {
            match raw.trim().parse() {
                Ok(secs) => self.engine.cache_ttl_secs = secs,
                Err(_) => warn!(value = %raw, "ignoring invalid CACHE_TTL_SECONDS"),
            }
        }

        if let Some(raw) = lookup("CACHE_MAXSIZE") {
            match raw.trim().parse() {
                Ok(size) => self.engine.cache_max_entries = size,
                Err(_) => warn!(value = %raw, "ignoring invalid CACHE_MAXSIZE"),
            }
        }
    }

    /// Convenience helper: set/replace a provider API key and optionally set default provider.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers.insert(provider_id.as_str().to_string(), ProviderConfig { api_key });

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present and non-blank.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers
            .get(provider_id.as_str())
            .map(|cfg| cfg.api_key.as_str())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }
}
