//! DL20 line decoder
//!
//! Turns one raw telemetry line into a [`SensorRecord`]. Structural problems
//! (too few fields, strict-grammar mismatch) fail the line; everything else
//! degrades to NaN inside the record.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::grammar::{BlockValues, LineGrammar, PositionalGrammar, RawRecord, StrictGrammar};
use crate::types::{Offsets, SensorRecord};

/// Structural decode failures. No record is produced for the line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("too few fields in line {found} - {line}")]
    TooFewFields { found: usize, line: String },

    #[error("line does not match strict grammar (length {length}): {line}")]
    GrammarMismatch { length: usize, line: String },
}

/// Which grammar the decoder uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderMode {
    /// Field positions by delimiter; tolerant of malformed sub-messages
    #[default]
    Positional,
    /// Whole line must match one anchored pattern
    Strict,
}

impl std::fmt::Display for DecoderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecoderMode::Positional => write!(f, "positional"),
            DecoderMode::Strict => write!(f, "strict"),
        }
    }
}

/// Parse a number, yielding NaN instead of failing.
///
/// Surrounding whitespace is ignored; no locale handling.
pub fn robust_float(text: &str) -> f64 {
    text.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Convert one block's values, NaN-filling a failed block.
fn block_to_f64(block: BlockValues<'_>) -> [f64; 3] {
    match block {
        Some([a, b, c]) => [robust_float(a), robust_float(b), robust_float(c)],
        None => [f64::NAN; 3],
    }
}

/// Calibration hook applied to every decoded record.
///
/// Offsets are carried through the decoder but deliberately not applied
/// yet: no calibration model has been agreed for the raw channels. Any
/// future correction belongs here and nowhere else.
pub fn apply_offsets(record: SensorRecord, _offsets: &Offsets) -> SensorRecord {
    record
}

/// Decodes DL20 lines using a configured grammar.
pub struct LineDecoder {
    grammar: Box<dyn LineGrammar>,
    mode: DecoderMode,
}

impl std::fmt::Debug for LineDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineDecoder")
            .field("grammar", &self.grammar.name())
            .finish()
    }
}

impl LineDecoder {
    /// Build a decoder for the given grammar.
    pub fn new(mode: DecoderMode) -> Result<Self, regex::Error> {
        let grammar: Box<dyn LineGrammar> = match mode {
            DecoderMode::Positional => Box::new(PositionalGrammar),
            DecoderMode::Strict => Box::new(StrictGrammar::new()?),
        };
        Ok(Self { grammar, mode })
    }

    /// Positional decoder; cannot fail to build.
    pub fn positional() -> Self {
        Self {
            grammar: Box::new(PositionalGrammar),
            mode: DecoderMode::Positional,
        }
    }

    pub fn mode(&self) -> DecoderMode {
        self.mode
    }

    /// Decode one line.
    ///
    /// `offsets` is passed to [`apply_offsets`], which currently leaves the
    /// record unchanged.
    pub fn decode(&self, line: &str, offsets: &Offsets) -> Result<SensorRecord, DecodeError> {
        let raw = self.grammar.split(line)?;
        let record = assemble(&raw);
        Ok(apply_offsets(record, offsets))
    }
}

/// Build the numeric record from raw text fields.
fn assemble(raw: &RawRecord<'_>) -> SensorRecord {
    let [heading, pitch, roll] = block_to_f64(raw.hpr);
    let [depth_top, pressure_top, temperature_top] = block_to_f64(raw.dpt_top);
    let [depth_bottom, pressure_bottom, temperature_bottom] = block_to_f64(raw.dpt_bottom);

    SensorRecord {
        record_number: robust_float(raw.record_number),
        transducer_top: robust_float(raw.transducer_top),
        transducer_bottom: robust_float(raw.transducer_bottom),
        temperature_voltage: robust_float(raw.temperature_voltage),
        button: robust_float(raw.button),
        heading,
        pitch,
        roll,
        depth_top,
        pressure_top,
        temperature_top,
        depth_bottom,
        pressure_bottom,
        temperature_bottom,
        delta_pressure: pressure_bottom - pressure_top,
        depth_winch: f64::NAN,
    }
}
