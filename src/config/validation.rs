//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Unknown keys never break a config.

use std::collections::HashSet;

use super::LoggerConfig;
use crate::types::FIELD_NAMES_SORTED;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for LoggerConfig.
///
/// Maintained by hand to match logger_config.rs; `[offsets]` accepts any
/// record field name.
pub fn known_config_keys() -> HashSet<String> {
    let fixed: &[&str] = &[
        // [telemetry]
        "telemetry",
        "telemetry.mode",
        "telemetry.replay_delay_secs",
        "telemetry.serial",
        "telemetry.serial.port",
        "telemetry.serial.baud_rate",
        "telemetry.serial.data_bits",
        "telemetry.serial.parity",
        "telemetry.serial.stop_bits",
        "telemetry.serial.read_timeout_secs",
        "telemetry.serial.line_length",
        // [offsets]
        "offsets",
        // [encoder]
        "encoder",
        "encoder.poll_interval_ms",
        "encoder.tau_time",
        "encoder.tau_depth",
        "encoder.smoothing",
        "encoder.max_publish_failures",
        "encoder.link",
        "encoder.link.port",
        "encoder.link.slave",
        "encoder.link.baud_rate",
        "encoder.link.timeout_secs",
        // [publish]
        "publish",
        "publish.redis_url",
        "publish.key",
        // [recording]
        "recording",
        "recording.prefix",
        "recording.autostart",
    ];
    fixed
        .iter()
        .map(|k| k.to_string())
        .chain(FIELD_NAMES_SORTED.iter().map(|f| format!("offsets.{f}")))
        .collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Levenshtein edit distance over chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Suggest the closest known key, if within edit distance 3. Ties go to the
/// alphabetically first key so suggestions are stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<String>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.clone())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

/// Validate value ranges on a parsed LoggerConfig.
///
/// Returns (errors, warnings): errors are impossible values that must
/// prevent startup; warnings are unusual but workable.
pub fn validate_physical_ranges(config: &LoggerConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // --- telemetry ---
    let t = &config.telemetry;
    if super::replay_delay_from_secs(t.replay_delay_secs).is_none() {
        errors.push(format!(
            "telemetry.replay_delay_secs = {} must be between 0 and {}",
            t.replay_delay_secs,
            super::defaults::MAX_REPLAY_DELAY_SECS
        ));
    }
    let s = &t.serial;
    if s.baud_rate == 0 {
        errors.push("telemetry.serial.baud_rate must be > 0".to_string());
    }
    if !(5..=8).contains(&s.data_bits) {
        errors.push(format!(
            "telemetry.serial.data_bits = {} must be 5-8",
            s.data_bits
        ));
    }
    if s.stop_bits != 1 && s.stop_bits != 2 {
        errors.push(format!(
            "telemetry.serial.stop_bits = {} must be 1 or 2",
            s.stop_bits
        ));
    }
    if !s.read_timeout_secs.is_finite() || s.read_timeout_secs <= 0.0 {
        errors.push(format!(
            "telemetry.serial.read_timeout_secs = {} must be > 0",
            s.read_timeout_secs
        ));
    }
    if s.line_length != 0 && s.line_length != crate::acquisition::serial::DEFAULT_LINE_LENGTH {
        warnings.push(ValidationWarning {
            field: "telemetry.serial.line_length".to_string(),
            message: format!(
                "telemetry.serial.line_length = {} differs from the DL20 line length ({})",
                s.line_length,
                crate::acquisition::serial::DEFAULT_LINE_LENGTH
            ),
            suggestion: None,
        });
    }

    // --- offsets ---
    for (name, value) in config.offsets.iter() {
        if !value.as_f64().is_finite() {
            errors.push(format!("offsets.{name} must be finite"));
        }
    }

    // --- encoder ---
    let e = &config.encoder;
    // tau values are divisors in the forgetting weight
    if !e.tau_time.is_finite() || e.tau_time <= 0.0 {
        errors.push(format!("encoder.tau_time = {} must be > 0", e.tau_time));
    }
    if !e.tau_depth.is_finite() || e.tau_depth <= 0.0 {
        errors.push(format!("encoder.tau_depth = {} must be > 0", e.tau_depth));
    }
    if e.poll_interval_ms < super::defaults::ENCODER_MIN_POLL_INTERVAL_MS {
        errors.push(format!(
            "encoder.poll_interval_ms = {} must be >= {}",
            e.poll_interval_ms,
            super::defaults::ENCODER_MIN_POLL_INTERVAL_MS
        ));
    }
    if e.poll_interval_ms as f64 > e.tau_time * 1000.0 {
        warnings.push(ValidationWarning {
            field: "encoder.poll_interval_ms".to_string(),
            message: format!(
                "encoder.poll_interval_ms = {} is longer than tau_time; every weight will be near zero",
                e.poll_interval_ms
            ),
            suggestion: None,
        });
    }
    if !(1..=247).contains(&e.link.slave) {
        errors.push(format!(
            "encoder.link.slave = {} must be a Modbus slave address (1-247)",
            e.link.slave
        ));
    }
    if e.link.baud_rate == 0 {
        errors.push("encoder.link.baud_rate must be > 0".to_string());
    }
    if !e.link.timeout_secs.is_finite() || e.link.timeout_secs <= 0.0 {
        errors.push(format!(
            "encoder.link.timeout_secs = {} must be > 0",
            e.link.timeout_secs
        ));
    }

    // --- publish ---
    let p = &config.publish;
    if p.key.trim().is_empty() {
        errors.push("publish.key must not be empty".to_string());
    }
    if !["redis://", "rediss://", "unix://", "redis+unix://"]
        .iter()
        .any(|scheme| p.redis_url.starts_with(scheme))
    {
        errors.push(format!(
            "publish.redis_url = '{}' must start with redis://, rediss:// or unix://",
            p.redis_url
        ));
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("tau_tme", "tau_time"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [telemetry]
            [telemetry.serial]
            port = "/dev/ttyS0"
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"telemetry".to_string()));
        assert!(keys.contains(&"telemetry.serial".to_string()));
        assert!(keys.contains(&"telemetry.serial.port".to_string()));
    }

    #[test]
    fn test_offsets_accept_record_fields() {
        let warnings = validate_unknown_keys("[offsets]\ndepth_top = 1.0\nheading = 2.0\n");
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn test_typo_gets_suggestion() {
        let warnings = validate_unknown_keys("[encoder]\ntau_dept = 0.05\n");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "encoder.tau_dept");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("encoder.tau_depth"));
    }

    #[test]
    fn test_default_config_has_no_range_errors() {
        let (errors, warnings) = validate_physical_ranges(&LoggerConfig::default());
        assert!(errors.is_empty(), "{errors:?}");
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_bad_slave_and_poll_interval() {
        let mut config = LoggerConfig::default();
        config.encoder.link.slave = 0;
        config.encoder.poll_interval_ms = 5;
        let (errors, _) = validate_physical_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("encoder.link.slave")));
        assert!(errors.iter().any(|e| e.contains("poll_interval_ms")));
    }

    #[test]
    fn test_bad_redis_url() {
        let mut config = LoggerConfig::default();
        config.publish.redis_url = "localhost:6379".to_string();
        let (errors, _) = validate_physical_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("redis_url")));
    }
}
