//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Telemetry Pipeline
// ============================================================================

/// Records allowed in flight between the producer and the sink.
///
/// 1 keeps the sink at most one record behind and never reorders.
pub const HANDOFF_CAPACITY: usize = 1;

/// Log a progress line every this many received lines.
pub const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Delay between lines when replaying a recorded file (seconds).
pub const REPLAY_DELAY_SECS: f64 = 3.0;

/// Longest replay delay accepted from config or the command line (seconds).
pub const MAX_REPLAY_DELAY_SECS: f64 = 3600.0;

// ============================================================================
// Winch Encoder
// ============================================================================

/// Counter poll interval (milliseconds).
pub const ENCODER_POLL_INTERVAL_MS: u64 = 100;

/// Smallest poll interval accepted by validation (milliseconds).
pub const ENCODER_MIN_POLL_INTERVAL_MS: u64 = 10;

/// Consecutive publish failures before the encoder loop gives up.
pub const ENCODER_MAX_PUBLISH_FAILURES: u32 = 50;

// ============================================================================
// Publishing
// ============================================================================

/// Redis server used when none is configured.
pub const REDIS_URL: &str = "redis://localhost/";

// ============================================================================
// Config Files
// ============================================================================

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "DL20_CONFIG";

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "dl20_logger.toml";
