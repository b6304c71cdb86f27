//! Session recorder
//!
//! Appends telemetry to a family of files sharing one prefix:
//!
//! | suffix | contents                                         |
//! |--------|--------------------------------------------------|
//! | `.raw` | every received line, verbatim                    |
//! | `.csv` | decoded records, sorted columns, `%e` values     |
//! | `.txt` | operator notes, `<last record number>: <note>`   |
//! | `.log` | session log lines                                |
//!
//! Files are opened in append mode per write, so an existing session can be
//! resumed and nothing is lost if the process dies mid-run.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::types::{OffsetValue, Offsets, SensorRecord, FIELD_NAMES_SORTED};

pub const RAW_SUFFIX: &str = ".raw";
pub const DATA_SUFFIX: &str = ".csv";
pub const NOTES_SUFFIX: &str = ".txt";
pub const LOG_SUFFIX: &str = ".log";

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("no save file selected")]
    NoSaveFile,

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Format a value like C's `%e`: six fraction digits and an exponent with
/// an explicit sign and at least two digits (`1.234000e+01`).
pub fn format_scientific(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let rendered = format!("{value:.6e}");
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        None => rendered,
    }
}

/// CSV header row: quoted, sorted field names.
pub fn csv_header() -> String {
    FIELD_NAMES_SORTED
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(",")
}

/// CSV data row in header order.
pub fn csv_row(record: &SensorRecord) -> String {
    record
        .sorted_fields()
        .map(|(_, v)| format_scientific(v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Writes session files under a selected prefix while recording is on.
#[derive(Debug, Default)]
pub struct Recorder {
    prefix: Option<PathBuf>,
    recording: bool,
    last_record: Option<f64>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path for one of the session files.
    fn path(&self, suffix: &str) -> Result<PathBuf, RecorderError> {
        let prefix = self.prefix.as_ref().ok_or(RecorderError::NoSaveFile)?;
        let mut os = prefix.clone().into_os_string();
        os.push(suffix);
        Ok(PathBuf::from(os))
    }

    fn open_append(path: &Path) -> Result<File, RecorderError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| RecorderError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    fn append(&self, suffix: &str, text: &str) -> Result<(), RecorderError> {
        let path = self.path(suffix)?;
        let mut file = Self::open_append(&path)?;
        file.write_all(text.as_bytes())
            .map_err(|source| RecorderError::Io { path, source })
    }

    /// Select the file prefix. Returns the session files that already exist;
    /// new data will be appended to them.
    pub fn select_prefix(&mut self, prefix: impl Into<PathBuf>) -> Vec<PathBuf> {
        let prefix = prefix.into();
        info!(prefix = %prefix.display(), "Save file selected");
        self.prefix = Some(prefix);

        let mut existing = Vec::new();
        for (suffix, kind) in [
            (RAW_SUFFIX, "raw data"),
            (LOG_SUFFIX, "log data"),
            (NOTES_SUFFIX, "notes data"),
            (DATA_SUFFIX, "output data"),
        ] {
            if let Ok(path) = self.path(suffix) {
                if path.is_file() {
                    warn!(path = %path.display(), "{} file already exists", kind);
                    existing.push(path);
                }
            }
        }
        existing
    }

    /// Forget the prefix. Recording stays toggled but writes nothing.
    pub fn close(&mut self) {
        info!("Save file closed");
        self.prefix = None;
        self.last_record = None;
    }

    pub fn prefix(&self) -> Option<&Path> {
        self.prefix.as_deref()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Whether writes will actually reach disk.
    pub fn is_active(&self) -> bool {
        self.recording && self.prefix.is_some()
    }

    /// Flip recording on/off and return the new state.
    pub fn toggle_recording(&mut self) -> bool {
        self.set_recording(!self.recording);
        self.recording
    }

    pub fn set_recording(&mut self, on: bool) {
        self.recording = on;
        info!("Recording: {}", if on { "On" } else { "Off" });
        if on && self.prefix.is_none() {
            warn!("Recording: save file is not chosen, nothing will be saved to disk");
        }
    }

    /// Append a received line to the `.raw` file.
    pub fn write_raw(&mut self, line: &str) -> Result<(), RecorderError> {
        if !self.is_active() {
            return Ok(());
        }
        self.append(RAW_SUFFIX, &format!("{line}\n"))
    }

    /// Append a decoded record to the `.csv` file, writing the header first
    /// if the file is empty. Always remembers the record number for notes.
    pub fn write_record(&mut self, record: &SensorRecord) -> Result<(), RecorderError> {
        self.last_record = Some(record.record_number);
        if !self.is_active() {
            return Ok(());
        }

        let path = self.path(DATA_SUFFIX)?;
        let mut file = Self::open_append(&path)?;
        let is_empty = file
            .metadata()
            .map(|m| m.len() == 0)
            .map_err(|source| RecorderError::Io {
                path: path.clone(),
                source,
            })?;

        let mut text = String::new();
        if is_empty {
            info!("Save: new datafile, adding header");
            text.push_str(&csv_header());
            text.push('\n');
        }
        text.push_str(&csv_row(record));
        text.push('\n');
        file.write_all(text.as_bytes())
            .map_err(|source| RecorderError::Io { path, source })
    }

    /// Record number that notes are tagged with; empty before the first record.
    pub fn last_record_label(&self) -> String {
        self.last_record.map(record_label).unwrap_or_default()
    }

    /// Append an operator note tagged with the last record number.
    ///
    /// Notes do not depend on the recording toggle, only on a save file.
    pub fn add_note(&mut self, note: &str) -> Result<(), RecorderError> {
        if self.prefix.is_none() {
            warn!("Adding note: no save file selected, cannot add any notes");
            return Err(RecorderError::NoSaveFile);
        }
        let line = format!("{}: {}\n", self.last_record_label(), note);
        self.append(NOTES_SUFFIX, &line)
    }

    /// Append a line to the session `.log` file, if a save file is selected.
    pub fn log(&mut self, text: &str) -> Result<(), RecorderError> {
        if self.prefix.is_none() {
            return Ok(());
        }
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        self.append(LOG_SUFFIX, &format!("{stamp} {text}\n"))
    }

    /// Change an offset and leave an automatic note describing it.
    ///
    /// Returns `Ok(false)` if the value was negligible and nothing changed.
    pub fn set_offset(
        &mut self,
        offsets: &mut Offsets,
        name: &str,
        value: OffsetValue,
    ) -> Result<bool, RecorderError> {
        if !offsets.set(name, value) {
            return Ok(false);
        }
        if self.prefix.is_some() {
            self.add_note(&format!("*** auto ***: setting offset '{name}' to {value}"))?;
        }
        Ok(true)
    }
}

/// Note prefix for a record number: `1042.0`, `nan`, `inf`, `-inf`.
fn record_label(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        let sign = if n < 0.0 { "-" } else { "" };
        format!("{sign}inf")
    } else {
        format!("{n:?}")
    }
}
