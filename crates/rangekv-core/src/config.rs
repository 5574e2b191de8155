//! Configuration management for rangekv
//!
//! Sources, lowest precedence first:
//! - Hardcoded defaults
//! - /etc/rangekv/rangekv.{yaml,toml,json}
//! - ./config/rangekv.{yaml,toml,json}
//! - File named by the RANGEKV_CONFIG env var
//! - RANGEKV__* environment variables

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::scan::DEFAULT_GC_TTL_SECONDS;

/// Root configuration structure for rangekv
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RangeKvConfig {
    #[serde(default)]
    pub scan_queue: ScanQueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RangeKvConfig {
    /// Load configuration from all sources and validate it.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        builder = builder
            .add_source(File::with_name("/etc/rangekv/rangekv").required(false))
            .add_source(File::with_name("./config/rangekv").required(false));

        if let Ok(config_path) = std::env::var("RANGEKV_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        // Example: RANGEKV__SCAN_QUEUE__GC_TTL_SECONDS=3600
        builder = builder.add_source(
            Environment::with_prefix("RANGEKV")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: RangeKvConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let defaults = ScanQueueConfig::default();
        builder
            .set_default(
                "scan_queue.worker_interval_secs",
                defaults.worker_interval_secs,
            )?
            .set_default("scan_queue.gc_ttl_seconds", defaults.gc_ttl_seconds)?
            .set_default("scan_queue.gc_batch_size", defaults.gc_batch_size as u64)?
            .set_default(
                "scan_queue.intent_age_threshold_secs",
                defaults.intent_age_threshold_secs,
            )?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scan_queue.validate()?;

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Message(
                "logging.level must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: RangeKvConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

/// Operational knobs of the range scan queue.
///
/// The queue name, its capacity and the scoring intervals are fixed and not
/// configurable.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanQueueConfig {
    /// Seconds between scheduling ticks of the background worker
    pub worker_interval_secs: u64,

    /// Age after which a superseded version may be garbage collected
    pub gc_ttl_seconds: i64,

    /// Keys per GC batch sent to the engine
    pub gc_batch_size: usize,

    /// Age after which an extant write intent is resolved
    pub intent_age_threshold_secs: u64,
}

impl Default for ScanQueueConfig {
    fn default() -> Self {
        Self {
            worker_interval_secs: 60,
            gc_ttl_seconds: DEFAULT_GC_TTL_SECONDS,
            gc_batch_size: 256,
            intent_age_threshold_secs: 60 * 60,
        }
    }
}

impl ScanQueueConfig {
    /// Validate scan queue settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_interval_secs == 0 {
            return Err(ConfigError::Message(
                "scan_queue.worker_interval_secs must be > 0".to_string(),
            ));
        }
        if self.gc_ttl_seconds <= 0 {
            return Err(ConfigError::Message(
                "scan_queue.gc_ttl_seconds must be > 0".to_string(),
            ));
        }
        if self.gc_batch_size == 0 {
            return Err(ConfigError::Message(
                "scan_queue.gc_batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Get worker interval as Duration
    pub fn worker_interval(&self) -> Duration {
        Duration::from_secs(self.worker_interval_secs)
    }

    /// Get intent age threshold as Duration
    pub fn intent_age_threshold(&self) -> Duration {
        Duration::from_secs(self.intent_age_threshold_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,

    /// Emit JSON formatted events
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
