use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ProviderError;
use crate::model::interval::Interval;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub binance: BinanceConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    pub rest_base_url: String,
}

/// Whether a failed live tick withdraws readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessPolicy {
    /// Once ready, stay ready; failures are only reported.
    #[default]
    FailOpen,
    /// A failed tick clears readiness until the next successful tick.
    FailClosed,
}

/// Settings for one candle window. Immutable once the provider is built.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub symbol: String,
    pub interval: String,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default = "default_limit_per_fetch")]
    pub limit_per_fetch: usize,
    #[serde(default = "default_backfill_pause_ms")]
    pub backfill_pause_ms: u64,
    #[serde(default)]
    pub readiness_policy: ReadinessPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_window_days() -> u32 {
    7
}

fn default_update_interval_ms() -> u64 {
    10_000
}

fn default_limit_per_fetch() -> usize {
    1000
}

fn default_backfill_pause_ms() -> u64 {
    500
}

impl ProviderConfig {
    pub fn new(symbol: &str, interval: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            window_days: default_window_days(),
            update_interval_ms: default_update_interval_ms(),
            limit_per_fetch: default_limit_per_fetch(),
            backfill_pause_ms: default_backfill_pause_ms(),
            readiness_policy: ReadinessPolicy::default(),
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn backfill_pause(&self) -> Duration {
        Duration::from_millis(self.backfill_pause_ms)
    }

    pub fn interval(&self) -> Result<Interval> {
        self.interval
            .parse::<Interval>()
            .with_context(|| format!("provider.interval '{}' is invalid", self.interval))
    }

    /// Check everything the provider rejects at construction, returning
    /// the parsed interval.
    pub fn check(&self) -> std::result::Result<Interval, ProviderError> {
        let interval = self.interval.parse::<Interval>()?;
        let reject = |msg: &str| Err(ProviderError::Config(msg.to_string()));
        if self.symbol.trim().is_empty() {
            return reject("provider.symbol must not be empty");
        }
        if self.window_days == 0 {
            return reject("provider.window_days must be > 0");
        }
        if self.update_interval_ms == 0 {
            return reject("provider.update_interval_ms must be > 0");
        }
        if self.limit_per_fetch == 0 {
            return reject("provider.limit_per_fetch must be > 0");
        }
        Ok(interval)
    }

    pub fn validate(&self) -> Result<()> {
        self.check().context("invalid provider config")?;
        Ok(())
    }
}

fn config_path() -> PathBuf {
    std::env::var("CW_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/default.toml"))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::load_from_path(&config_path())?;

        if let Ok(symbol) = std::env::var("CW_SYMBOL") {
            if !symbol.trim().is_empty() {
                config.provider.symbol = symbol;
            }
        }
        config.provider.symbol = config.provider.symbol.trim().to_ascii_uppercase();

        config
            .provider
            .validate()
            .context("provider config is invalid")?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&config_str).with_context(|| format!("failed to parse {}", path.display()))
    }
}
