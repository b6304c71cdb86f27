//! Shared data structures for DL20 telemetry logging
//!
//! - `SensorRecord`: one decoded telemetry line, sixteen channels
//! - `Offsets`: operator-supplied per-field corrections

mod offsets;
mod record;

pub use offsets::*;
pub use record::*;
