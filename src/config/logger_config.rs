//! Logger Configuration - telemetry, encoder, publish and recording settings
//!
//! Every section implements `Default` with the values the instruments ship
//! with, so the logger runs unchanged when no config file is present.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::acquisition::{DecoderMode, SerialSettings};
use crate::encoder::{CounterLink, DecayConstants, EncoderLoopSettings};
use crate::types::Offsets;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `LoggerConfig::load()` which searches:
/// 1. `$DL20_CONFIG` env var
/// 2. `./dl20_logger.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// DL20 telemetry input and decoding
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Static offset corrections; listed entries overlay the default table
    #[serde(default, deserialize_with = "offsets_over_defaults")]
    pub offsets: Offsets,

    /// Winch counter polling
    #[serde(default)]
    pub encoder: EncoderConfig,

    /// Key-value publish target
    #[serde(default)]
    pub publish: PublishConfig,

    /// Session files
    #[serde(default)]
    pub recording: RecordingConfig,
}

fn offsets_over_defaults<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Offsets, D::Error> {
    Ok(Offsets::deserialize(deserializer)?.over_defaults())
}

impl LoggerConfig {
    /// Load configuration using the standard search order:
    /// 1. `$DL20_CONFIG` environment variable
    /// 2. `./dl20_logger.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded logger config from DL20_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from DL20_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "DL20_CONFIG points to non-existent file, falling back");
            }
        }

        // 2. Check ./dl20_logger.toml
        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded logger config from ./{}", defaults::CONFIG_FILE_NAME);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::CONFIG_FILE_NAME);
                }
            }
        }

        // 3. Defaults
        info!("No {} found, using built-in defaults", defaults::CONFIG_FILE_NAME);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate TOML text. Unknown keys and suspicious values are
    /// logged as warnings; impossible values are errors.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        // Two-pass: check for unknown keys first (warnings only)
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate ranges. Errors block startup; warnings are logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = super::validation::validate_physical_ranges(self);
        for w in &warnings {
            warn!("{}", w);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Telemetry
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `positional` (default) or `strict`
    #[serde(default)]
    pub mode: DecoderMode,

    /// Seconds between lines in replay mode
    #[serde(default = "default_replay_delay")]
    pub replay_delay_secs: f64,

    #[serde(default)]
    pub serial: SerialSettings,
}

fn default_replay_delay() -> f64 {
    defaults::REPLAY_DELAY_SECS
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            mode: DecoderMode::default(),
            replay_delay_secs: default_replay_delay(),
            serial: SerialSettings::default(),
        }
    }
}

impl TelemetryConfig {
    /// Configured replay delay; out-of-range values (rejected by
    /// validation) fall back to no delay.
    pub fn replay_delay(&self) -> Duration {
        replay_delay_from_secs(self.replay_delay_secs).unwrap_or(Duration::ZERO)
    }
}

/// Convert a replay delay in seconds, accepting only finite values in
/// `0..=MAX_REPLAY_DELAY_SECS`.
pub fn replay_delay_from_secs(secs: f64) -> Option<Duration> {
    (secs.is_finite() && (0.0..=defaults::MAX_REPLAY_DELAY_SECS).contains(&secs))
        .then(|| Duration::from_secs_f64(secs))
}

// ============================================================================
// Encoder
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Forgetting time constant (s)
    #[serde(default = "default_tau_time")]
    pub tau_time: f64,

    /// Forgetting displacement constant (m)
    #[serde(default = "default_tau_depth")]
    pub tau_depth: f64,

    /// Publish the weight-blended velocity instead of the raw difference
    #[serde(default)]
    pub smoothing: bool,

    #[serde(default = "default_max_publish_failures")]
    pub max_publish_failures: u32,

    /// Counter serial link
    #[serde(default)]
    pub link: CounterLink,
}

fn default_poll_interval_ms() -> u64 {
    defaults::ENCODER_POLL_INTERVAL_MS
}
fn default_tau_time() -> f64 {
    crate::encoder::velocity::DEFAULT_TAU_TIME
}
fn default_tau_depth() -> f64 {
    crate::encoder::velocity::DEFAULT_TAU_DEPTH
}
fn default_max_publish_failures() -> u32 {
    defaults::ENCODER_MAX_PUBLISH_FAILURES
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            tau_time: default_tau_time(),
            tau_depth: default_tau_depth(),
            smoothing: false,
            max_publish_failures: default_max_publish_failures(),
            link: CounterLink::default(),
        }
    }
}

impl EncoderConfig {
    pub fn constants(&self) -> DecayConstants {
        DecayConstants {
            tau_time: self.tau_time,
            tau_depth: self.tau_depth,
        }
    }

    /// Loop settings publishing under `key`.
    pub fn loop_settings(&self, key: &str) -> EncoderLoopSettings {
        EncoderLoopSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            constants: self.constants(),
            smoothing: self.smoothing,
            key: key.to_string(),
            max_publish_failures: self.max_publish_failures,
        }
    }
}

// ============================================================================
// Publish
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_key")]
    pub key: String,
}

fn default_redis_url() -> String {
    defaults::REDIS_URL.to_string()
}
fn default_key() -> String {
    crate::encoder::publish::DEFAULT_KEY.to_string()
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            key: default_key(),
        }
    }
}

// ============================================================================
// Recording
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Session file prefix; `<prefix>.raw`, `.csv`, `.txt`, `.log`
    #[serde(default)]
    pub prefix: Option<String>,

    /// Start with recording switched on
    #[serde(default)]
    pub autostart: bool,
}
