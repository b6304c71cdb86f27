//! Record sinks: console readout and session recorder.

use std::sync::{Arc, Mutex};
use tracing::info;

use super::processing_loop::{RecordSink, TelemetryEvent};
use crate::storage::Recorder;
use crate::types::SensorRecord;

/// Readouts shown on the console: field, label, unit, decimals.
const READOUTS: &[(&str, &str, &str, usize)] = &[
    ("transducer_top", "T.top", "raw", 0),
    ("transducer_bottom", "T.bot", "raw", 0),
    ("temperature_voltage", "Tint", "raw", 0),
    ("button", "Btn", "", 0),
    ("heading", "Hdg", "deg", 1),
    ("pitch", "Pitch", "deg", 2),
    ("roll", "Roll", "deg", 2),
    ("pressure_top", "P.top", "B", 2),
    ("temperature_top", "Temp.top", "C", 2),
    ("pressure_bottom", "P.bot", "B", 2),
    ("temperature_bottom", "Temp.bot", "C", 2),
    ("delta_pressure", "dP", "B", 3),
];

/// One-line console summary of a record.
pub fn readout_line(record: &SensorRecord) -> String {
    let mut parts = vec![format!("#{:.0}", record.record_number)];
    for &(field, label, unit, decimals) in READOUTS {
        let value = record.get(field).unwrap_or(f64::NAN);
        let text = if value.is_nan() {
            "--".to_string()
        } else {
            format!("{value:.decimals$}")
        };
        if unit.is_empty() {
            parts.push(format!("{label}={text}"));
        } else {
            parts.push(format!("{label}={text}{unit}"));
        }
    }
    parts.join(" ")
}

/// Logs every decoded record at `info`.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl RecordSink for ConsoleSink {
    fn on_event(&mut self, event: &TelemetryEvent) -> anyhow::Result<()> {
        if let Some(record) = event.record() {
            info!("{}", readout_line(record));
        }
        Ok(())
    }
}

/// Feeds the shared [`Recorder`]: raw line first, then the decoded record.
///
/// The recorder is shared with the operator console, which toggles
/// recording and adds notes while the loop runs.
#[derive(Debug, Clone)]
pub struct RecorderSink {
    recorder: Arc<Mutex<Recorder>>,
}

impl RecorderSink {
    pub fn new(recorder: Arc<Mutex<Recorder>>) -> Self {
        Self { recorder }
    }
}

impl RecordSink for RecorderSink {
    fn on_event(&mut self, event: &TelemetryEvent) -> anyhow::Result<()> {
        let mut recorder = self
            .recorder
            .lock()
            .map_err(|_| anyhow::anyhow!("recorder lock poisoned"))?;
        recorder.write_raw(&event.raw)?;
        match &event.outcome {
            Ok(record) => recorder.write_record(record)?,
            Err(e) => recorder.log(&format!("line {} rejected: {}", event.sequence, e))?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readout_marks_missing_values() {
        let record = SensorRecord {
            record_number: 5.0,
            transducer_top: 1.0,
            transducer_bottom: 2.0,
            temperature_voltage: 3.0,
            button: 0.0,
            heading: f64::NAN,
            pitch: f64::NAN,
            roll: f64::NAN,
            depth_top: 1.0,
            pressure_top: 1.0,
            temperature_top: 4.0,
            depth_bottom: 2.0,
            pressure_bottom: 1.25,
            temperature_bottom: 4.0,
            delta_pressure: 0.25,
            depth_winch: f64::NAN,
        };
        let line = readout_line(&record);
        assert!(line.starts_with("#5 "));
        assert!(line.contains("Hdg=--"));
        assert!(line.contains("dP=0.250B"));
    }
}
