//! DL20 serial link settings and line framing.
//!
//! The package talks 300 baud, 7E1 and occasionally emits truncated or
//! run-together lines. Those are dropped by length before decoding.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_serial::{DataBits, Parity, SerialPortBuilder, StopBits};

/// Default DL20 baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 300;

/// Raw length (terminator included) of a well-formed DL20 line.
pub const DEFAULT_LINE_LENGTH: usize = 82;

/// Default per-read timeout in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: f64 = 5.0;

/// Parity setting as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    None,
    Even,
    Odd,
}

/// Single-letter form, as in "7E1".
impl std::fmt::Display for ParitySetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = match self {
            ParitySetting::None => "N",
            ParitySetting::Even => "E",
            ParitySetting::Odd => "O",
        };
        f.write_str(letter)
    }
}

impl From<ParitySetting> for Parity {
    fn from(p: ParitySetting) -> Self {
        match p {
            ParitySetting::None => Parity::None,
            ParitySetting::Even => Parity::Even,
            ParitySetting::Odd => Parity::Odd,
        }
    }
}

/// Serial link parameters for the telemetry port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyS0`. Empty means "not configured".
    pub port: String,
    pub baud_rate: u32,
    /// 5..=8
    pub data_bits: u8,
    pub parity: ParitySetting,
    /// 1 or 2
    pub stop_bits: u8,
    pub read_timeout_secs: f64,
    /// Lines whose raw length differs are dropped. `0` disables the filter.
    pub line_length: usize,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 7,
            parity: ParitySetting::Even,
            stop_bits: 1,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            line_length: DEFAULT_LINE_LENGTH,
        }
    }
}

impl SerialSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout_secs.max(0.0))
    }

    /// Expected raw line length, if the filter is enabled.
    pub fn expected_length(&self) -> Option<usize> {
        (self.line_length > 0).then_some(self.line_length)
    }

    /// Port builder for `port` with these framing settings.
    pub fn builder(&self, port: &str) -> SerialPortBuilder {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            8 => DataBits::Eight,
            _ => DataBits::Seven,
        };
        let stop_bits = if self.stop_bits == 2 {
            StopBits::Two
        } else {
            StopBits::One
        };
        tokio_serial::new(port, self.baud_rate)
            .data_bits(data_bits)
            .parity(self.parity.into())
            .stop_bits(stop_bits)
            .timeout(self.read_timeout())
    }
}

/// Whether a raw line (terminator included) passes the length filter.
pub fn accept_length(raw_len: usize, expected: Option<usize>) -> bool {
    expected.map_or(true, |len| raw_len == len)
}

/// Strip the high bit of every byte and return the resulting ASCII text
/// with trailing whitespace removed.
pub fn mask_seven_bit(raw: &[u8]) -> String {
    let masked: String = raw.iter().map(|b| char::from(b & 0x7f)).collect();
    masked.trim_end().to_string()
}
