//! Register-level access to the counter over Modbus RTU.
//!
//! Floats and longs span two consecutive holding registers, high word
//! first (big-endian word and byte order).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_modbus::client::{rtu, Context, Reader, Writer};
use tokio_modbus::Slave;

/// Counter failures. Every device call can fail; none are retried here.
#[derive(Debug, Error)]
pub enum CounterError {
    /// No response within the request deadline.
    #[error("timeout reading register {register:#06x}")]
    Timeout { register: u16 },

    /// The device answered with a Modbus exception.
    #[error("device exception at register {register:#06x}: {code}")]
    Exception { register: u16, code: String },

    /// Serial or framing failure; the link should be reopened.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to open {port}: {error}")]
    Open {
        port: String,
        #[source]
        error: tokio_serial::Error,
    },

    #[error("short response from register {register:#06x}: {words} words")]
    ShortResponse { register: u16, words: usize },

    #[error("no counter found on any of: {0}")]
    NotFound(String),
}

impl CounterError {
    /// Timeouts skip one poll cycle; everything else stops the loop.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CounterError::Timeout { .. })
    }
}

/// Two-register reads and writes. Implemented once for the Modbus client;
/// tests provide an in-memory map.
#[async_trait]
pub trait RegisterAccess: Send + 'static {
    async fn read_f32(&mut self, register: u16) -> Result<f32, CounterError>;
    async fn read_u32(&mut self, register: u16) -> Result<u32, CounterError>;
    async fn write_f32(&mut self, register: u16, value: f32) -> Result<(), CounterError>;
}

/// Join two registers, high word first.
pub fn words_to_u32(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// Split a value into two registers, high word first.
pub fn u32_to_words(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xffff) as u16]
}

/// Link parameters for the counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterLink {
    /// Empty means auto-discover among `/dev/ttyUSB*`.
    pub port: String,
    pub slave: u8,
    pub baud_rate: u32,
    pub timeout_secs: f64,
}

impl Default for CounterLink {
    fn default() -> Self {
        Self {
            port: String::new(),
            slave: 1,
            baud_rate: 9600,
            timeout_secs: 0.6,
        }
    }
}

impl CounterLink {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }
}

/// Modbus RTU client over a serial port (8E1).
pub struct ModbusRegisters {
    ctx: Context,
    timeout: Duration,
}

impl ModbusRegisters {
    pub fn open(port: &str, link: &CounterLink) -> Result<Self, CounterError> {
        let builder = tokio_serial::new(port, link.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::Even)
            .stop_bits(tokio_serial::StopBits::One)
            .timeout(link.timeout());
        let stream = tokio_serial::SerialStream::open(&builder).map_err(|error| CounterError::Open {
            port: port.to_string(),
            error,
        })?;
        let ctx = rtu::attach_slave(stream, Slave(link.slave));
        Ok(Self {
            ctx,
            timeout: link.timeout(),
        })
    }

    async fn read_pair(&mut self, register: u16) -> Result<[u16; 2], CounterError> {
        let response = tokio::time::timeout(self.timeout, self.ctx.read_holding_registers(register, 2))
            .await
            .map_err(|_| CounterError::Timeout { register })?;
        let words = response
            .map_err(|e| CounterError::Transport(e.to_string()))?
            .map_err(|code| CounterError::Exception {
                register,
                code: format!("{code:?}"),
            })?;
        match words.as_slice() {
            [high, low, ..] => Ok([*high, *low]),
            _ => Err(CounterError::ShortResponse {
                register,
                words: words.len(),
            }),
        }
    }
}

#[async_trait]
impl RegisterAccess for ModbusRegisters {
    async fn read_f32(&mut self, register: u16) -> Result<f32, CounterError> {
        let [high, low] = self.read_pair(register).await?;
        Ok(f32::from_bits(words_to_u32(high, low)))
    }

    async fn read_u32(&mut self, register: u16) -> Result<u32, CounterError> {
        let [high, low] = self.read_pair(register).await?;
        Ok(words_to_u32(high, low))
    }

    async fn write_f32(&mut self, register: u16, value: f32) -> Result<(), CounterError> {
        let words = u32_to_words(value.to_bits());
        let response =
            tokio::time::timeout(self.timeout, self.ctx.write_multiple_registers(register, &words))
                .await
                .map_err(|_| CounterError::Timeout { register })?;
        response
            .map_err(|e| CounterError::Transport(e.to_string()))?
            .map_err(|code| CounterError::Exception {
                register,
                code: format!("{code:?}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_order_is_high_first() {
        assert_eq!(words_to_u32(0x1234, 0x5678), 0x1234_5678);
        assert_eq!(u32_to_words(0x1234_5678), [0x1234, 0x5678]);
    }

    #[test]
    fn test_float_from_registers() {
        // 1.5f32 = 0x3FC00000
        let [high, low] = u32_to_words(1.5f32.to_bits());
        assert_eq!((high, low), (0x3FC0, 0x0000));
        assert_eq!(f32::from_bits(words_to_u32(high, low)), 1.5);
    }

    #[test]
    fn test_default_link() {
        let link = CounterLink::default();
        assert_eq!(link.slave, 1);
        assert_eq!(link.baud_rate, 9600);
        assert!((link.timeout().as_secs_f64() - 0.6).abs() < 1e-6);
    }
}
