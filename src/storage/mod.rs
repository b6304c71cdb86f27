//! Session Storage
//!
//! Persists telemetry sessions as flat files next to each other: raw
//! capture, decoded CSV, operator notes and a session log.

pub mod recorder;

pub use recorder::{format_scientific, Recorder, RecorderError};
