//! Configuration for the feed meter.

use crate::core::{EventTimeParser, Granularity};
use crate::state::TtlPolicy;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// chrono format string used for reading timestamps that are not RFC 3339
    pub timestamp_format: String,

    /// IANA time zone that local timestamps and window boundaries live in
    pub timezone: String,

    /// Expiry durations for per-feed state
    pub ttl: TtlConfig,

    /// Number of worker threads processing feeds in parallel
    pub workers: usize,

    /// Capacity of each bounded reading channel
    pub channel_capacity: usize,

    /// How often expired state is swept from the store
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,

    /// Directory the per-channel JSON lines files are written to
    pub output_path: PathBuf,

    /// Directory for the state snapshot and statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("feed-meter");

        Self {
            timestamp_format: crate::core::DEFAULT_TIMESTAMP_FORMAT.to_string(),
            timezone: "UTC".to_string(),
            ttl: TtlConfig::default(),
            workers: 4,
            channel_capacity: 10_000,
            sweep_interval: Duration::from_secs(60),
            output_path: data_dir.join("output"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the file is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("feed-meter")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.output_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Check the values that cannot be expressed in the type system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sweep_interval must be positive".to_string(),
            ));
        }
        self.tz()?;
        self.ttl.policy()?;
        Ok(())
    }

    /// Parse the configured time zone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown time zone: {}", self.timezone)))
    }

    /// Build the timestamp parser shared by the resolver and the processor.
    pub fn parser(&self) -> Result<EventTimeParser, ConfigError> {
        Ok(EventTimeParser::new(self.timestamp_format.clone(), self.tz()?))
    }

    /// Path of the persisted state snapshot.
    pub fn state_file(&self) -> PathBuf {
        self.data_path.join("state.json")
    }

    /// Path of the persisted processing statistics.
    pub fn stats_file(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }
}

/// Expiry durations, one per state field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    /// Last value and last event time of a feed
    #[serde(with = "duration_serde")]
    pub value: Duration,
    #[serde(with = "duration_serde")]
    pub half_hour: Duration,
    #[serde(with = "duration_serde")]
    pub hour: Duration,
    #[serde(with = "duration_serde")]
    pub day: Duration,
    #[serde(with = "duration_serde")]
    pub month: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        const HOUR: u64 = 60 * 60;
        Self {
            value: Duration::from_secs(36 * HOUR),
            half_hour: Duration::from_secs(36 * HOUR),
            hour: Duration::from_secs(36 * HOUR),
            day: Duration::from_secs(36 * HOUR),
            month: Duration::from_secs(66 * 24 * HOUR),
        }
    }
}

impl TtlConfig {
    /// Duration configured for one granularity's bucket map.
    pub fn for_granularity(&self, granularity: Granularity) -> Duration {
        match granularity {
            Granularity::HalfHour => self.half_hour,
            Granularity::Hour => self.hour,
            Granularity::Day => self.day,
            Granularity::Month => self.month,
        }
    }

    /// Convert into the policy the state store works with.
    pub fn policy(&self) -> Result<TtlPolicy, ConfigError> {
        let convert = |name: &str, d: Duration| {
            if d.is_zero() {
                return Err(ConfigError::Invalid(format!("ttl.{name} must be positive")));
            }
            chrono::Duration::from_std(d)
                .map_err(|_| ConfigError::Invalid(format!("ttl.{name} is out of range")))
        };

        Ok(TtlPolicy {
            value: convert("value", self.value)?,
            half_hour: convert("half_hour", self.half_hour)?,
            hour: convert("hour", self.hour)?,
            day: convert("day", self.day)?,
            month: convert("month", self.month)?,
        })
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
