//! Decoded DL20 sensor record

use serde::{Deserialize, Serialize};

/// Column names of a [`SensorRecord`], in alphabetical order.
///
/// This is the CSV column order used by the recorder.
pub const FIELD_NAMES_SORTED: [&str; SensorRecord::FIELD_COUNT] = [
    "button",
    "delta_pressure",
    "depth_bottom",
    "depth_top",
    "depth_winch",
    "heading",
    "pitch",
    "pressure_bottom",
    "pressure_top",
    "record_number",
    "roll",
    "temperature_bottom",
    "temperature_top",
    "temperature_voltage",
    "transducer_bottom",
    "transducer_top",
];

/// One decoded telemetry line from the DL20 package.
///
/// Every value is an `f64`; fields the decoder could not recover hold NaN.
/// `delta_pressure` is always `pressure_bottom - pressure_top`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Record counter emitted by the instrument
    pub record_number: f64,

    // === Direct telemetry (raw ADC counts) ===
    pub transducer_top: f64,
    pub transducer_bottom: f64,
    /// Internal temperature sensor voltage (raw)
    pub temperature_voltage: f64,
    /// Button state
    pub button: f64,

    // === Attitude block (ISHPR) ===
    /// Heading (deg)
    pub heading: f64,
    /// Pitch (deg)
    pub pitch: f64,
    /// Roll (deg)
    pub roll: f64,

    // === Top depth/pressure/temperature block (ISDPT) ===
    /// Depth below atmosphere (m)
    pub depth_top: f64,
    /// Pressure (bar)
    pub pressure_top: f64,
    /// Temperature (°C)
    pub temperature_top: f64,

    // === Bottom depth/pressure/temperature block (ISDPT) ===
    pub depth_bottom: f64,
    pub pressure_bottom: f64,
    pub temperature_bottom: f64,

    // === Derived ===
    /// `pressure_bottom - pressure_top` (bar)
    pub delta_pressure: f64,
    /// Winch cable-out depth from the encoder pipeline; NaN until correlated
    pub depth_winch: f64,
}

impl SensorRecord {
    pub const FIELD_COUNT: usize = 16;

    /// Value of a field by its column name.
    pub fn get(&self, name: &str) -> Option<f64> {
        let value = match name {
            "record_number" => self.record_number,
            "transducer_top" => self.transducer_top,
            "transducer_bottom" => self.transducer_bottom,
            "temperature_voltage" => self.temperature_voltage,
            "button" => self.button,
            "heading" => self.heading,
            "pitch" => self.pitch,
            "roll" => self.roll,
            "depth_top" => self.depth_top,
            "pressure_top" => self.pressure_top,
            "temperature_top" => self.temperature_top,
            "depth_bottom" => self.depth_bottom,
            "pressure_bottom" => self.pressure_bottom,
            "temperature_bottom" => self.temperature_bottom,
            "delta_pressure" => self.delta_pressure,
            "depth_winch" => self.depth_winch,
            _ => return None,
        };
        Some(value)
    }

    /// `(name, value)` pairs in alphabetical column order.
    pub fn sorted_fields(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FIELD_NAMES_SORTED
            .iter()
            .filter_map(move |&name| self.get(name).map(|v| (name, v)))
    }

    /// Copy of this record with the winch depth slot filled in.
    ///
    /// This is the only sanctioned mutation after decode; it lets a caller
    /// correlate the encoder pipeline with telemetry between decode and sink.
    pub fn with_winch_depth(mut self, depth_winch: f64) -> Self {
        self.depth_winch = depth_winch;
        self
    }

    /// Number of NaN-valued fields, excluding the `depth_winch` placeholder.
    pub fn missing_count(&self) -> usize {
        self.sorted_fields()
            .filter(|(name, v)| *name != "depth_winch" && v.is_nan())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SensorRecord {
        SensorRecord {
            record_number: 12.0,
            transducer_top: 1.0,
            transducer_bottom: 2.0,
            temperature_voltage: 3.0,
            button: 0.0,
            heading: 10.0,
            pitch: 1.5,
            roll: -0.5,
            depth_top: 100.0,
            pressure_top: 11.0,
            temperature_top: 4.0,
            depth_bottom: 102.0,
            pressure_bottom: 11.2,
            temperature_bottom: 3.9,
            delta_pressure: 11.2 - 11.0,
            depth_winch: f64::NAN,
        }
    }

    #[test]
    fn test_sorted_names_are_sorted_and_complete() {
        let mut names = FIELD_NAMES_SORTED.to_vec();
        names.sort_unstable();
        assert_eq!(names, FIELD_NAMES_SORTED.to_vec());

        let record = sample();
        assert_eq!(record.sorted_fields().count(), SensorRecord::FIELD_COUNT);
    }

    #[test]
    fn test_get_unknown_field() {
        assert!(sample().get("salinity").is_none());
        assert_eq!(sample().get("heading"), Some(10.0));
    }

    #[test]
    fn test_with_winch_depth() {
        let record = sample().with_winch_depth(42.5);
        assert_eq!(record.depth_winch, 42.5);
        assert_eq!(record.missing_count(), 0);
    }
}
