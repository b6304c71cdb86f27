//! Telemetry Pipeline Module
//!
//! ```text
//! LineSource ──► decode ──► mpsc(1) ──► RecordSink
//!  (replay,       (producer task)        (console, recorder)
//!   serial,
//!   stdin)
//! ```

pub mod processing_loop;
pub mod sinks;
pub mod source;

pub use processing_loop::{LoopStats, RecordSink, TelemetryEvent, TelemetryLoop, WinchDepthProvider};
pub use sinks::{ConsoleSink, RecorderSink};
pub use source::{LineEvent, LineSource, ReplaySource, SerialSource, SourceError, StdinSource};
