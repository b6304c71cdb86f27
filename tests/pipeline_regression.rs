//! Pipeline Regression Tests
//!
//! Replays a recorded cast through the full telemetry loop into the session
//! recorder and checks what lands on disk. The cast contains a clean line,
//! a line with a damaged attitude checksum, a truncated line and blank
//! lines, the mix seen on a noisy serial link.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use dl20_logger::acquisition::{compute_checksum, seal, DecoderMode, LineDecoder};
use dl20_logger::pipeline::{RecorderSink, ReplaySource, TelemetryLoop};
use dl20_logger::storage::Recorder;
use dl20_logger::types::{OffsetValue, Offsets, FIELD_NAMES_SORTED};

fn cast_line(record: u32, depth: f64) -> String {
    let pressure = 1.013 + depth * 0.1005;
    format!(
        "{record}\t{}\t{}\t2401\t0\t{}\t{}\t{}",
        20_000 + record,
        20_075 + record,
        seal("ISHPR,181.0,-0.50,0.25"),
        seal(&format!("ISDPT,{depth:.2},M,{pressure:.3},B,12.00,C")),
        seal(&format!("ISDPT,{:.2},M,{:.3},B,11.95,C", depth + 0.5, pressure + 0.05)),
    )
}

/// Attitude block whose checksum is wrong but still two hex digits.
fn damaged_hpr_line(record: u32) -> String {
    let hpr = "ISHPR,181.0,-0.50,0.25";
    let bad = format!("{hpr} {:02x}", compute_checksum(hpr.as_bytes()) ^ 0x5a);
    cast_line(record, 2.0).replace(&seal(hpr), &bad)
}

fn write_cast(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("cast.raw");
    let lines = [
        cast_line(1001, 1.0),
        String::new(),
        damaged_hpr_line(1002),
        "1003\t20003\t20078".to_string(),
        "   ".to_string(),
        cast_line(1004, 3.0),
    ];
    std::fs::write(&path, lines.join("\r\n") + "\r\n").unwrap();
    path
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

async fn replay_into(
    recorder: Arc<Mutex<Recorder>>,
    input: &Path,
    mode: DecoderMode,
) -> dl20_logger::pipeline::LoopStats {
    let source = ReplaySource::open(input, Duration::ZERO).await.unwrap();
    TelemetryLoop::new(
        LineDecoder::new(mode).unwrap(),
        Arc::new(RwLock::new(Offsets::default())),
        CancellationToken::new(),
    )
    .run(source, RecorderSink::new(recorder))
    .await
}

#[tokio::test]
async fn replayed_cast_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_cast(dir.path());
    let prefix = dir.path().join("session");

    let mut recorder = Recorder::new();
    assert!(recorder.select_prefix(&prefix).is_empty());
    recorder.set_recording(true);
    let recorder = Arc::new(Mutex::new(recorder));

    let stats = replay_into(Arc::clone(&recorder), &input, DecoderMode::Positional).await;

    assert_eq!(stats.lines_received, 4, "blank lines are not delivered");
    assert_eq!(stats.records_decoded, 3);
    assert_eq!(stats.records_degraded, 1);
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.sink_errors, 0);
    assert!(stats.source_error.is_none());

    // Every delivered line is kept raw, without the CR
    let raw = read_lines(&dir.path().join("session.raw"));
    assert_eq!(raw.len(), 4);
    assert_eq!(raw[0], cast_line(1001, 1.0));
    assert_eq!(raw[2], "1003\t20003\t20078");

    // Header once, then one row per decoded record
    let csv = read_lines(&dir.path().join("session.csv"));
    assert_eq!(csv.len(), 4);
    let header: Vec<String> = FIELD_NAMES_SORTED.iter().map(|n| format!("\"{n}\"")).collect();
    assert_eq!(csv[0], header.join(","));
    let heading_col = FIELD_NAMES_SORTED.iter().position(|n| *n == "heading").unwrap();
    let depth_col = FIELD_NAMES_SORTED.iter().position(|n| *n == "depth_top").unwrap();
    let row1: Vec<&str> = csv[1].split(',').collect();
    let row2: Vec<&str> = csv[2].split(',').collect();
    assert_eq!(row1.len(), FIELD_NAMES_SORTED.len());
    assert_eq!(row1[heading_col], "1.810000e+02");
    assert_eq!(row1[depth_col], "1.000000e+00");
    assert_eq!(row2[heading_col], "nan");
    assert_eq!(row2[depth_col], "2.000000e+00");

    // The truncated line is logged, not recorded
    let log = read_lines(&dir.path().join("session.log"));
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("too few fields in line 3"), "{}", log[0]);

    // Notes are tagged with the last decoded record number
    recorder.lock().unwrap().add_note("bottom of cast").unwrap();
    let notes = read_lines(&dir.path().join("session.txt"));
    assert_eq!(notes, vec!["1004.0: bottom of cast".to_string()]);
}

#[tokio::test]
async fn strict_grammar_gives_the_same_recording() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_cast(dir.path());

    let mut csvs = Vec::new();
    for (mode, name) in [(DecoderMode::Positional, "a"), (DecoderMode::Strict, "b")] {
        let mut recorder = Recorder::new();
        recorder.select_prefix(dir.path().join(name));
        recorder.set_recording(true);
        let stats = replay_into(Arc::new(Mutex::new(recorder)), &input, mode).await;
        assert_eq!(stats.records_decoded, 3, "{mode}");
        csvs.push(std::fs::read_to_string(dir.path().join(format!("{name}.csv"))).unwrap());
    }
    assert_eq!(csvs[0], csvs[1]);
}

#[tokio::test]
async fn nothing_is_written_while_recording_is_off() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_cast(dir.path());
    let prefix = dir.path().join("idle");

    let mut recorder = Recorder::new();
    recorder.select_prefix(&prefix);
    let recorder = Arc::new(Mutex::new(recorder));
    let stats = replay_into(Arc::clone(&recorder), &input, DecoderMode::Positional).await;

    assert_eq!(stats.records_decoded, 3);
    assert!(!dir.path().join("idle.raw").exists());
    assert!(!dir.path().join("idle.csv").exists());
    // The record number is still tracked for notes
    assert_eq!(recorder.lock().unwrap().last_record_label(), "1004.0");
}

#[test]
fn offset_change_leaves_an_automatic_note() {
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new();
    recorder.select_prefix(dir.path().join("cal"));
    let mut offsets = Offsets::default();

    assert!(recorder
        .set_offset(&mut offsets, "depth_top", OffsetValue::Float(0.25))
        .unwrap());
    assert!(!recorder
        .set_offset(&mut offsets, "depth_top", OffsetValue::Float(0.0))
        .unwrap());

    let notes = read_lines(&dir.path().join("cal.txt"));
    assert_eq!(
        notes,
        vec![": *** auto ***: setting offset 'depth_top' to 0.250000".to_string()]
    );
    assert_eq!(offsets.get("depth_top"), Some(OffsetValue::Float(0.25)));
}

#[test]
fn existing_session_files_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("old.csv"), "x\n").unwrap();
    let mut recorder = Recorder::new();
    let existing = recorder.select_prefix(dir.path().join("old"));
    assert_eq!(existing, vec![dir.path().join("old.csv")]);
}
