//! Telemetry acquisition module
//!
//! Checksum validation, line grammars and the decoder that turns DL20
//! telemetry lines into [`SensorRecord`](crate::types::SensorRecord)s.

pub mod checksum;
pub mod decoder;
pub mod grammar;
pub mod serial;

pub use checksum::{compute_checksum, format_checksum, seal, verify_checksum};
pub use decoder::{apply_offsets, robust_float, DecodeError, DecoderMode, LineDecoder};
pub use grammar::{LineGrammar, PositionalGrammar, RawRecord, StrictGrammar};
pub use serial::SerialSettings;
