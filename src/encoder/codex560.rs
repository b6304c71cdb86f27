//! Kübler Codex 560 counter.
//!
//! Thin typed wrappers over [`RegisterAccess`]. Presets are numbered 1 and
//! 2; counters 1 (main) and 2 (secondary).

use std::time::Duration;
use tracing::{debug, info};

use super::registers::{CounterError, CounterLink, ModbusRegisters, RegisterAccess};

// ============================================================================
// Register Map
// ============================================================================

pub const REG_MAIN_COUNTER: u16 = 0x0000;
pub const REG_SECONDARY_COUNTER: u16 = 0x0002;
pub const REG_PRESET_1: u16 = 0x0004;
pub const REG_PRESET_2: u16 = 0x0006;
pub const REG_MULTIPLICATION_FACTOR: u16 = 0x0008;
pub const REG_DIVISION_FACTOR: u16 = 0x000A;
pub const REG_DECIMAL_PLACES: u16 = 0x8012;
pub const REG_STATUS: u16 = 0x8014;

/// Pause after opening the port before the first request.
pub const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Accepted range for the scaling factors.
pub const FACTOR_RANGE: std::ops::RangeInclusive<f32> = 0.0..=99.99999;

/// Selects preset 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    One,
    Two,
}

impl Preset {
    fn register(self) -> u16 {
        match self {
            Preset::One => REG_PRESET_1,
            Preset::Two => REG_PRESET_2,
        }
    }
}

/// Selects the main or the secondary counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Main,
    Secondary,
}

impl Counter {
    fn register(self) -> u16 {
        match self {
            Counter::Main => REG_MAIN_COUNTER,
            Counter::Secondary => REG_SECONDARY_COUNTER,
        }
    }
}

/// Counter device driver.
pub struct Codex560<R: RegisterAccess> {
    registers: R,
}

impl<R: RegisterAccess> Codex560<R> {
    pub fn new(registers: R) -> Self {
        Self { registers }
    }

    pub async fn read_main_counter(&mut self) -> Result<f64, CounterError> {
        Ok(f64::from(self.registers.read_f32(REG_MAIN_COUNTER).await?))
    }

    pub async fn read_secondary_counter(&mut self) -> Result<f64, CounterError> {
        Ok(f64::from(self.registers.read_f32(REG_SECONDARY_COUNTER).await?))
    }

    pub async fn read_preset(&mut self, preset: Preset) -> Result<f64, CounterError> {
        Ok(f64::from(self.registers.read_f32(preset.register()).await?))
    }

    pub async fn write_preset(&mut self, preset: Preset, value: f64) -> Result<(), CounterError> {
        self.registers.write_f32(preset.register(), value as f32).await
    }

    /// Set a counter back to zero.
    pub async fn reset_counter(&mut self, counter: Counter) -> Result<(), CounterError> {
        self.registers.write_f32(counter.register(), 0.0).await
    }

    /// Number of decimals shown on the display (top byte of the register).
    pub async fn read_decimal_places(&mut self) -> Result<u8, CounterError> {
        Ok((self.registers.read_u32(REG_DECIMAL_PLACES).await? >> 24) as u8)
    }

    /// Status bytes in device order (least significant byte first).
    pub async fn read_status(&mut self) -> Result<[u8; 4], CounterError> {
        Ok(self.registers.read_u32(REG_STATUS).await?.to_le_bytes())
    }

    /// Value is clamped to 0..=99.99999.
    pub async fn set_multiplication_factor(&mut self, value: f32) -> Result<(), CounterError> {
        let value = value.clamp(*FACTOR_RANGE.start(), *FACTOR_RANGE.end());
        self.registers.write_f32(REG_MULTIPLICATION_FACTOR, value).await
    }

    /// Value is clamped to 0..=99.99999.
    pub async fn set_division_factor(&mut self, value: f32) -> Result<(), CounterError> {
        let value = value.clamp(*FACTOR_RANGE.start(), *FACTOR_RANGE.end());
        self.registers.write_f32(REG_DIVISION_FACTOR, value).await
    }

    /// Check that a counter answers by reading its status word.
    pub async fn probe(mut self) -> Result<Self, CounterError> {
        let status = self.read_status().await?;
        debug!(?status, "Counter status");
        Ok(self)
    }

    pub fn into_inner(self) -> R {
        self.registers
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Serial ports that may host a counter (USB serial adapters).
pub fn candidate_ports() -> Vec<String> {
    match tokio_serial::available_ports() {
        Ok(ports) => {
            let mut names: Vec<String> = ports
                .into_iter()
                .map(|p| p.port_name)
                .filter(|name| name.contains("ttyUSB"))
                .collect();
            names.sort();
            names
        }
        Err(e) => {
            tracing::warn!("Failed to enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

/// Open the counter on `link.port`, or search the USB serial ports when
/// that is empty or does not answer.
pub async fn connect(link: &CounterLink) -> Result<(String, Codex560<ModbusRegisters>), CounterError> {
    if !link.port.is_empty() {
        match open_and_probe(&link.port, link).await {
            Ok(device) => return Ok((link.port.clone(), device)),
            Err(e) => tracing::warn!(port = %link.port, "Counter not reachable: {}", e),
        }
    }

    let candidates = candidate_ports();
    for port in &candidates {
        info!("Testing for Codex 560 with address {} on {}", link.slave, port);
        match open_and_probe(port, link).await {
            Ok(device) => {
                info!("✓ Kübler Codex 560 found on {}", port);
                return Ok((port.clone(), device));
            }
            Err(e) => debug!(port = %port, "No counter: {}", e),
        }
    }

    Err(CounterError::NotFound(if candidates.is_empty() {
        "(no USB serial ports)".to_string()
    } else {
        candidates.join(", ")
    }))
}

async fn open_and_probe(port: &str, link: &CounterLink) -> Result<Codex560<ModbusRegisters>, CounterError> {
    let registers = ModbusRegisters::open(port, link)?;
    tokio::time::sleep(SETTLE_DELAY).await;
    Codex560::new(registers).probe().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// In-memory register file, two words per value.
    #[derive(Default)]
    struct FakeRegisters {
        values: HashMap<u16, u32>,
    }

    #[async_trait]
    impl RegisterAccess for FakeRegisters {
        async fn read_f32(&mut self, register: u16) -> Result<f32, CounterError> {
            Ok(f32::from_bits(self.read_u32(register).await?))
        }
        async fn read_u32(&mut self, register: u16) -> Result<u32, CounterError> {
            self.values
                .get(&register)
                .copied()
                .ok_or(CounterError::Timeout { register })
        }
        async fn write_f32(&mut self, register: u16, value: f32) -> Result<(), CounterError> {
            self.values.insert(register, value.to_bits());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_decimal_places_use_top_byte() {
        let mut regs = FakeRegisters::default();
        regs.values.insert(REG_DECIMAL_PLACES, 0x0300_0000);
        let mut device = Codex560::new(regs);
        assert_eq!(device.read_decimal_places().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_status_is_little_endian() {
        let mut regs = FakeRegisters::default();
        regs.values.insert(REG_STATUS, 0x0403_0201);
        let mut device = Codex560::new(regs);
        assert_eq!(device.read_status().await.unwrap(), [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_preset_and_reset() {
        let mut device = Codex560::new(FakeRegisters::default());
        device.write_preset(Preset::Two, 12.5).await.unwrap();
        assert_eq!(device.read_preset(Preset::Two).await.unwrap(), 12.5);

        device.registers.write_f32(REG_MAIN_COUNTER, 42.0).await.unwrap();
        device.reset_counter(Counter::Main).await.unwrap();
        assert_eq!(device.read_main_counter().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_factor_is_clamped() {
        let mut device = Codex560::new(FakeRegisters::default());
        device.set_division_factor(150.0).await.unwrap();
        let regs = device.into_inner();
        assert_eq!(f32::from_bits(regs.values[&REG_DIVISION_FACTOR]), 99.99999);
    }

    #[tokio::test]
    async fn test_probe_fails_without_status() {
        let device = Codex560::new(FakeRegisters::default());
        assert!(device.probe().await.err().unwrap().is_timeout());
    }
}
