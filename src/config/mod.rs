//! Logger Configuration Module
//!
//! Provides logger configuration loaded from TOML files.
//!
//! ## Loading Order
//!
//! 1. `DL20_CONFIG` environment variable (path to TOML file)
//! 2. `dl20_logger.toml` in the current working directory
//! 3. Built-in defaults (the instruments' factory settings)
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(LoggerConfig::load());
//!
//! // Anywhere in the codebase:
//! let tau = config::get().encoder.tau_time;
//! ```

mod logger_config;
pub mod defaults;
pub mod validation;

pub use logger_config::*;

use std::sync::OnceLock;

/// Global logger configuration, initialized once at startup.
static LOGGER_CONFIG: OnceLock<LoggerConfig> = OnceLock::new();

/// Initialize the global configuration.
///
/// A second call is ignored with a warning.
pub fn init(config: LoggerConfig) {
    if LOGGER_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get the global configuration, or the built-in defaults if `init()` has
/// not been called.
pub fn get() -> &'static LoggerConfig {
    LOGGER_CONFIG.get_or_init(|| {
        tracing::warn!("config::get() called before config::init(); using defaults");
        LoggerConfig::default()
    })
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    LOGGER_CONFIG.get().is_some()
}
