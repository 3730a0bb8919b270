//! Node configuration
//!
//! Settings come from defaults, a TOML file, or `NETSYNC_<SECTION>_<KEY>`
//! environment variables. Durations use humantime syntax ("5s", "250ms")
//! in both places.

use crate::core_event::AccumulatorLimits;
use crate::ids::NodeId;
use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "NETSYNC";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub anti_entropy: AntiEntropyConfig,
    pub accumulator: AccumulatorConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Cluster-unique identity of this controller instance
    pub node_id: String,

    /// Time background tasks get to flush on graceful shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_grace_period: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiEntropyConfig {
    /// Period between advertisements to a random peer
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub tombstone_purge_interval: Duration,
}

/// Batching of updates pushed to peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    pub max_events: usize,

    #[serde(with = "humantime_serde")]
    pub max_batch: Duration,

    #[serde(with = "humantime_serde")]
    pub max_idle: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events buffered per dispatcher before producers see QueueFull
    pub queue_capacity: usize,

    #[serde(with = "humantime_serde")]
    pub slow_listener_threshold: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub json_format: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::generate().to_string(),
            shutdown_grace_period: Duration::from_secs(5),
        }
    }
}

impl Default for AntiEntropyConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            initial_delay: Duration::from_secs(5),
            tombstone_purge_interval: Duration::from_secs(60),
        }
    }
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            max_events: 1000,
            max_batch: Duration::from_millis(50),
            max_idle: Duration::from_millis(10),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            slow_listener_threshold: Duration::from_secs(1),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
            with_thread_ids: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AccumulatorConfig {
    pub fn limits(&self) -> AccumulatorLimits {
        AccumulatorLimits::new(self.max_events, self.max_batch, self.max_idle)
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern NETSYNC_<SECTION>_<KEY>, for example
    /// NETSYNC_ANTI_ENTROPY_INTERVAL=2s.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Apply overrides from any key/value source on top of the defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let var = |section: &str, key: &str| {
            let name = format!("{}_{}_{}", ENV_PREFIX, section, key);
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, v)) = var("NODE", "ID") {
            config.node.node_id = v;
        }
        if let Some((k, v)) = var("NODE", "SHUTDOWN_GRACE_PERIOD") {
            config.node.shutdown_grace_period = parse_duration(&k, &v)?;
        }

        if let Some((k, v)) = var("ANTI_ENTROPY", "INTERVAL") {
            config.anti_entropy.interval = parse_duration(&k, &v)?;
        }
        if let Some((k, v)) = var("ANTI_ENTROPY", "INITIAL_DELAY") {
            config.anti_entropy.initial_delay = parse_duration(&k, &v)?;
        }
        if let Some((k, v)) = var("ANTI_ENTROPY", "TOMBSTONE_PURGE_INTERVAL") {
            config.anti_entropy.tombstone_purge_interval = parse_duration(&k, &v)?;
        }

        if let Some((k, v)) = var("ACCUMULATOR", "MAX_EVENTS") {
            config.accumulator.max_events = parse_var(&k, &v)?;
        }
        if let Some((k, v)) = var("ACCUMULATOR", "MAX_BATCH") {
            config.accumulator.max_batch = parse_duration(&k, &v)?;
        }
        if let Some((k, v)) = var("ACCUMULATOR", "MAX_IDLE") {
            config.accumulator.max_idle = parse_duration(&k, &v)?;
        }

        if let Some((k, v)) = var("EVENTS", "QUEUE_CAPACITY") {
            config.events.queue_capacity = parse_var(&k, &v)?;
        }
        if let Some((k, v)) = var("EVENTS", "SLOW_LISTENER_THRESHOLD") {
            config.events.slow_listener_threshold = parse_duration(&k, &v)?;
        }

        if let Some((_, v)) = var("LOG", "LEVEL") {
            config.logging.level = v;
        }
        if let Some((k, v)) = var("LOG", "JSON") {
            config.logging.json_format = parse_var(&k, &v)?;
        }

        if let Some((k, v)) = var("METRICS", "ENABLED") {
            config.metrics.enabled = parse_var(&k, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::FileReadError)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.node_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "node_id must not be empty".to_string(),
            ));
        }

        if self.anti_entropy.interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "anti_entropy.interval must be greater than 0".to_string(),
            ));
        }
        if self.anti_entropy.tombstone_purge_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "anti_entropy.tombstone_purge_interval must be greater than 0".to_string(),
            ));
        }

        self.accumulator
            .limits()
            .validate()
            .map_err(|e| ConfigError::ValidationFailed(format!("accumulator: {}", e)))?;

        if self.events.queue_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "events.queue_capacity must be greater than 0".to_string(),
            ));
        }

        LogLevel::from_str(&self.logging.level).map_err(|_| {
            ConfigError::ValidationFailed(format!("Invalid log level: {}", self.logging.level))
        })?;

        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(ConfigError::FileWriteError)?;
        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node.node_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.anti_entropy.interval, Duration::from_secs(5));
        assert_eq!(config.accumulator.limits().max_events, 1000);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.accumulator.max_events = 1;
        assert!(config.validate().is_err());

        config = Config::default();
        config.accumulator.max_idle = Duration::ZERO;
        assert!(config.validate().is_err());

        config = Config::default();
        config.events.queue_capacity = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.node.node_id = "  ".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.anti_entropy.interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = Config::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("NETSYNC_NODE_ID", "node-a"),
            ("NETSYNC_ANTI_ENTROPY_INTERVAL", "250ms"),
            ("NETSYNC_ACCUMULATOR_MAX_EVENTS", "64"),
            ("NETSYNC_LOG_JSON", "true"),
        ]))
        .unwrap();

        assert_eq!(config.node_id(), NodeId::new("node-a"));
        assert_eq!(config.anti_entropy.interval, Duration::from_millis(250));
        assert_eq!(config.accumulator.max_events, 64);
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_env_invalid_value_names_the_variable() {
        let err = Config::from_lookup(lookup(&[("NETSYNC_EVENTS_QUEUE_CAPACITY", "lots")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "NETSYNC_EVENTS_QUEUE_CAPACITY"),
            other => panic!("unexpected error: {}", other),
        }

        let err = Config::from_lookup(lookup(&[("NETSYNC_ACCUMULATOR_MAX_IDLE", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("netsync.toml");

        let mut config = Config::default();
        config.node.node_id = "node-b".to_string();
        config.anti_entropy.interval = Duration::from_secs(2);
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "[node]\nnode_id = \"node-c\"\n\n[anti_entropy]\ninterval = \"1s\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.node.node_id, "node-c");
        assert_eq!(config.anti_entropy.interval, Duration::from_secs(1));
        assert_eq!(config.events.queue_capacity, 10_000);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/netsync.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError(_)));
    }
}
