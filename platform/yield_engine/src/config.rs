//! Engine configuration with validation
//!
//! Values are resolved in order: built-in defaults, then an optional TOML
//! file, then environment variables.

use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::{
    DEFAULT_REFERRAL_RATE, DEFAULT_SIGNUP_BONUS, DEFAULT_STORE_PATH, DEFAULT_TICK_INTERVAL,
    SIMULATED_DAY,
};

pub const CONFIG_PATH_VAR: &str = "YIELD_ENGINE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/yield_engine.toml";

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub accrual: AccrualConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccrualConfig {
    /// Simulated day; one payout becomes due per elapsed period
    #[serde(with = "humantime_serde")]
    pub cycle_period: Duration,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    pub referral_rate: Decimal,
    pub signup_bonus: Decimal,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            cycle_period: SIMULATED_DAY,
            tick_interval: DEFAULT_TICK_INTERVAL,
            referral_rate: DEFAULT_REFERRAL_RATE,
            signup_bonus: DEFAULT_SIGNUP_BONUS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Json,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "json" | "file" => Ok(StoreBackend::Json),
            other => Err(ConfigError::InvalidValue(format!("unknown store backend '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Json,
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
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

impl EngineConfig {
    /// Load configuration from the config file (if any) and environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let config = if path.exists() {
            info!(path = %path.display(), "Loading engine configuration file");
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        let config = config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::FileError(e.to_string()))
    }

    /// Apply `YIELD_*` / `LOG_LEVEL` overrides resolved through `lookup`
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("YIELD_CYCLE_PERIOD") {
            self.accrual.cycle_period = parse_duration("YIELD_CYCLE_PERIOD", &value)?;
        }
        if let Some(value) = lookup("YIELD_TICK_INTERVAL") {
            self.accrual.tick_interval = parse_duration("YIELD_TICK_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("YIELD_REFERRAL_RATE") {
            self.accrual.referral_rate = parse_decimal("YIELD_REFERRAL_RATE", &value)?;
        }
        if let Some(value) = lookup("YIELD_SIGNUP_BONUS") {
            self.accrual.signup_bonus = parse_decimal("YIELD_SIGNUP_BONUS", &value)?;
        }
        if let Some(value) = lookup("YIELD_STORE_BACKEND") {
            self.persistence.backend = value.parse()?;
        }
        if let Some(value) = lookup("YIELD_STORE_PATH") {
            self.persistence.path = PathBuf::from(value);
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            self.logging.level = value;
        }
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accrual.cycle_period.is_zero() {
            return Err(ConfigError::InvalidValue("cycle_period must be non-zero".to_string()));
        }
        if chrono::Duration::from_std(self.accrual.cycle_period).is_err() {
            return Err(ConfigError::InvalidValue("cycle_period is out of range".to_string()));
        }
        if self.accrual.tick_interval.is_zero() {
            return Err(ConfigError::InvalidValue("tick_interval must be non-zero".to_string()));
        }
        if self.accrual.referral_rate < Decimal::ZERO || self.accrual.referral_rate >= Decimal::ONE {
            return Err(ConfigError::InvalidValue(format!(
                "referral_rate must be in [0, 1), got {}",
                self.accrual.referral_rate
            )));
        }
        if self.accrual.signup_bonus < Decimal::ZERO {
            return Err(ConfigError::InvalidValue("signup_bonus must not be negative".to_string()));
        }
        if self.persistence.backend == StoreBackend::Json
            && self.persistence.path.as_os_str().is_empty()
        {
            return Err(ConfigError::MissingRequired("persistence.path".to_string()));
        }
        Ok(())
    }

    /// Cycle period as a calendar offset for payout scheduling
    pub fn cycle_period(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.accrual.cycle_period)
            .unwrap_or_else(|_| chrono::Duration::seconds(SIMULATED_DAY.as_secs() as i64))
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(value.trim())
        .map_err(|e| ConfigError::EnvError(format!("{}: {}", key, e)))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|e| ConfigError::EnvError(format!("{}: {}", key, e)))
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Configuration file error: {0}")]
    FileError(String),

    #[error("Environment variable error: {0}")]
    EnvError(String),
}
