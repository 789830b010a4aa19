//! scalingengined TOML configuration.
//!
//! ```toml
//! default_cool_down_secs = 300
//! lock_size = 32
//!
//! [server]
//! port = 8080
//!
//! [logging]
//! level = "info"
//! format = "text"
//!
//! [platform]
//! api = "https://api.sys.example.com"
//! token = ""
//! client_id = "autoscaler"
//! secret = "..."
//! skip_ssl_validation = false
//! timeout = "10s"
//! max_retries = 3
//! retry_wait = "1s"
//! max_retry_wait = "30s"
//!
//! [db]
//! policy_db = "/var/lib/autoscaler/policy.redb"
//! scalingengine_db = "/var/lib/autoscaler/scalingengine.redb"
//! scheduler_db = "/var/lib/autoscaler/scheduler.redb"
//!
//! [synchronizer]
//! active_schedule_sync_interval = "600s"
//!
//! [pruner]
//! scaling_history_cutoff_days = 30
//! interval = "12h"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use autoscaler_engine::DEFAULT_COOL_DOWN_SECS;
use autoscaler_platform::{ClientConfig, Credentials, RetryPolicy};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

const MIN_COOL_DOWN_SECS: u64 = 60;
const MAX_COOL_DOWN_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_cool_down_secs: u64,
    pub lock_size: i64,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub platform: PlatformConfig,
    pub db: DbConfig,
    pub synchronizer: SynchronizerConfig,
    pub pruner: PrunerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_cool_down_secs: DEFAULT_COOL_DOWN_SECS,
            lock_size: 32,
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            platform: PlatformConfig::default(),
            db: DbConfig::default(),
            synchronizer: SynchronizerConfig::default(),
            pruner: PrunerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub api: String,
    /// Static bearer token, used when `client_id` is empty.
    pub token: String,
    pub client_id: String,
    pub secret: String,
    pub skip_ssl_validation: bool,
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    pub max_retries: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_wait: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_retry_wait: Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            api: "http://127.0.0.1:9022".to_string(),
            token: String::new(),
            client_id: String::new(),
            secret: String::new(),
            skip_ssl_validation: false,
            timeout: Duration::from_secs(10),
            max_retries: retry.max_retries,
            retry_wait: retry.wait,
            max_retry_wait: retry.max_wait,
        }
    }
}

impl PlatformConfig {
    pub fn credentials(&self) -> Credentials {
        if !self.client_id.is_empty() {
            Credentials::ClientCredentials {
                client_id: self.client_id.clone(),
                secret: self.secret.clone(),
            }
        } else if !self.token.is_empty() {
            Credentials::Bearer(self.token.clone())
        } else {
            Credentials::None
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.api.clone())
            .with_credentials(self.credentials())
            .with_timeout(self.timeout)
            .with_skip_ssl_validation(self.skip_ssl_validation)
            .with_retry(RetryPolicy {
                max_retries: self.max_retries,
                wait: self.retry_wait,
                max_wait: self.max_retry_wait,
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub policy_db: PathBuf,
    pub scalingengine_db: PathBuf,
    pub scheduler_db: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            policy_db: PathBuf::from("/var/lib/autoscaler/policy.redb"),
            scalingengine_db: PathBuf::from("/var/lib/autoscaler/scalingengine.redb"),
            scheduler_db: PathBuf::from("/var/lib/autoscaler/scheduler.redb"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynchronizerConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub active_schedule_sync_interval: Duration,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            active_schedule_sync_interval: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrunerConfig {
    /// Scaling histories older than this many days are deleted.
    pub scaling_history_cutoff_days: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            scaling_history_cutoff_days: 30,
            interval: Duration::from_secs(12 * 60 * 60),
        }
    }
}

impl PrunerConfig {
    pub fn cutoff(&self) -> Duration {
        Duration::from_secs(u64::from(self.scaling_history_cutoff_days) * 24 * 60 * 60)
    }
}

impl Config {
    /// Read, parse, and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a config document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.logging.level = config.logging.level.to_lowercase();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db.policy_db.as_os_str().is_empty() {
            return Err(invalid("Policy DB path is empty"));
        }
        if self.db.scalingengine_db.as_os_str().is_empty() {
            return Err(invalid("ScalingEngine DB path is empty"));
        }
        if self.db.scheduler_db.as_os_str().is_empty() {
            return Err(invalid("Scheduler DB path is empty"));
        }
        if self.platform.api.is_empty() {
            return Err(invalid("Platform API is empty"));
        }
        if !self.platform.api.starts_with("http://") && !self.platform.api.starts_with("https://") {
            return Err(invalid("Platform API must start with http:// or https://"));
        }
        if !self.platform.client_id.is_empty() && self.platform.secret.is_empty() {
            return Err(invalid("Platform secret is empty"));
        }
        if !(MIN_COOL_DOWN_SECS..=MAX_COOL_DOWN_SECS).contains(&self.default_cool_down_secs) {
            return Err(invalid(&format!(
                "DefaultCoolDownSecs should be between {MIN_COOL_DOWN_SECS} and {MAX_COOL_DOWN_SECS}"
            )));
        }
        if self.lock_size <= 0 {
            return Err(invalid("LockSize is less than or equal to 0"));
        }
        if self.synchronizer.active_schedule_sync_interval.is_zero() {
            return Err(invalid("ActiveScheduleSyncInterval must be greater than 0"));
        }
        if self.pruner.scaling_history_cutoff_days == 0 {
            return Err(invalid("ScalingHistoryCutoffDays must be greater than 0"));
        }
        if self.pruner.interval.is_zero() {
            return Err(invalid("PrunerInterval must be greater than 0"));
        }
        Ok(())
    }

    /// Stripe count for the engine's per-app lock.
    pub fn lock_stripes(&self) -> usize {
        usize::try_from(self.lock_size).unwrap_or(1)
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

/// Parse a duration string like "500ms", "30s", "5m", "12h", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(60 * 60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {raw:?}")))
}
