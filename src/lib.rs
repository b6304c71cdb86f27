//! DL20 Logger: profiler telemetry and winch depth
//!
//! Two data paths share this crate.
//!
//! ## Architecture
//!
//! - **Acquisition**: checksum, line grammars and the decoder for the DL20
//!   sensor package's tab-separated telemetry lines
//! - **Pipeline**: line sources (serial, replay file, stdin) feeding a
//!   producer/consumer loop that hands decoded records to sinks
//! - **Storage**: the session recorder (`.raw`, `.csv`, `.txt`, `.log`)
//! - **Encoder**: Codex 560 counter access over Modbus RTU, the
//!   forgetting-weight velocity estimator and the Redis depth publisher

pub mod acquisition;
pub mod config;
pub mod encoder;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-export logger configuration
pub use config::LoggerConfig;

// Re-export commonly used types
pub use types::{OffsetValue, Offsets, SensorRecord, FIELD_NAMES_SORTED};

// Re-export decoding
pub use acquisition::{DecodeError, DecoderMode, LineDecoder};

// Re-export the telemetry pipeline
pub use pipeline::{LineSource, RecordSink, TelemetryEvent, TelemetryLoop};

// Re-export the recorder
pub use storage::{Recorder, RecorderError};

// Re-export the encoder bridge
pub use encoder::{Codex560, CounterError, EncoderLoop, RedisPublisher};
