//! DL20 Logger - profiler telemetry logger
//!
//! Reads DL20 telemetry lines, decodes them, shows a readout and records
//! the session to disk.
//!
//! # Usage
//!
//! ```bash
//! # Live, from the DL20 serial link, recording to cast_042.*
//! dl20-logger --serial /dev/ttyS0 --record cast_042
//!
//! # Replay a recorded .raw file at full speed
//! dl20-logger --replay cast_042.raw --delay 0
//!
//! # From the simulator
//! dl20-simulator --rate 2 | dl20-logger --stdin
//! ```
//!
//! While running from a serial port or a file, stdin is an operator console:
//! `note <text>`, `record`, `offset <name> <value>`, `status`, `quit`.
//!
//! # Environment Variables
//!
//! - `DL20_CONFIG`: Path to a `dl20_logger.toml` config file
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dl20_logger::acquisition::{DecoderMode, LineDecoder};
use dl20_logger::config::{self, LoggerConfig};
use dl20_logger::encoder::RedisPublisher;
use dl20_logger::pipeline::{
    ConsoleSink, LineSource, RecorderSink, ReplaySource, SerialSource, StdinSource, TelemetryLoop,
    WinchDepthProvider,
};
use dl20_logger::storage::Recorder;
use dl20_logger::types::{OffsetValue, Offsets, FIELD_NAMES_SORTED};

/// How often the published winch depth is read back from Redis.
const WINCH_DEPTH_REFRESH: Duration = Duration::from_millis(500);

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "dl20-logger")]
#[command(about = "DL20 profiler telemetry logger")]
#[command(version)]
#[command(group(clap::ArgGroup::new("input").args(["serial", "replay", "stdin"])))]
struct CliArgs {
    /// Read the DL20 serial link on this port (default: [telemetry.serial] port)
    #[arg(long, value_name = "PORT")]
    serial: Option<String>,

    /// Replay a recorded raw telemetry file
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Seconds between replayed lines (default: [telemetry] replay_delay_secs)
    #[arg(long, requires = "replay", value_name = "SECS", value_parser = parse_delay)]
    delay: Option<Duration>,

    /// Read telemetry lines from stdin (e.g. piped from dl20-simulator)
    #[arg(long)]
    stdin: bool,

    /// Line grammar: positional or strict
    #[arg(long, value_parser = parse_mode)]
    mode: Option<DecoderMode>,

    /// Record the session to <PREFIX>.raw/.csv/.txt/.log and start recording
    #[arg(long, value_name = "PREFIX")]
    record: Option<PathBuf>,

    /// Config file (default: $DL20_CONFIG, then ./dl20_logger.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Set an offset, e.g. --offset depth_top=1.25 (repeatable)
    #[arg(long = "offset", value_name = "NAME=VALUE", value_parser = parse_offset)]
    offsets: Vec<(String, OffsetValue)>,

    /// Fill depth_winch from the winch encoder's published Redis key
    #[arg(long)]
    winch_depth: bool,
}

fn parse_mode(text: &str) -> Result<DecoderMode, String> {
    match text.to_ascii_lowercase().as_str() {
        "positional" => Ok(DecoderMode::Positional),
        "strict" => Ok(DecoderMode::Strict),
        other => Err(format!("unknown mode '{other}' (expected positional or strict)")),
    }
}

fn parse_delay(text: &str) -> Result<Duration, String> {
    let secs: f64 = text
        .trim()
        .parse()
        .map_err(|_| format!("'{text}' is not a number of seconds"))?;
    config::replay_delay_from_secs(secs).ok_or_else(|| {
        format!(
            "delay must be between 0 and {} seconds",
            config::defaults::MAX_REPLAY_DELAY_SECS
        )
    })
}

fn parse_offset_value(text: &str) -> Result<OffsetValue, String> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return Ok(OffsetValue::Int(v));
    }
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(OffsetValue::Float)
        .ok_or_else(|| format!("'{text}' is not a number"))
}

fn parse_offset(text: &str) -> Result<(String, OffsetValue), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{text}'"))?;
    let name = name.trim();
    if !FIELD_NAMES_SORTED.contains(&name) {
        return Err(format!("'{name}' is not a record field"));
    }
    Ok((name.to_string(), parse_offset_value(value)?))
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskName {
    TelemetryLoop,
    OperatorConsole,
    WinchDepth,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::TelemetryLoop => write!(f, "TelemetryLoop"),
            TaskName::OperatorConsole => write!(f, "OperatorConsole"),
            TaskName::WinchDepth => write!(f, "WinchDepth"),
        }
    }
}

/// Shared state the operator console acts on.
#[derive(Clone)]
struct Session {
    recorder: Arc<Mutex<Recorder>>,
    offsets: Arc<RwLock<Offsets>>,
}

impl Session {
    fn recorder(&self) -> Result<std::sync::MutexGuard<'_, Recorder>> {
        self.recorder
            .lock()
            .map_err(|_| anyhow::anyhow!("recorder lock poisoned"))
    }

    /// Set an offset and leave the automatic note.
    async fn set_offset(&self, name: &str, value: OffsetValue) -> Result<bool> {
        let mut offsets = self.offsets.write().await;
        let changed = self.recorder()?.set_offset(&mut offsets, name, value)?;
        Ok(changed)
    }
}

// ============================================================================
// Telemetry Task
// ============================================================================

fn spawn_telemetry<S: LineSource>(
    task_set: &mut JoinSet<Result<TaskName>>,
    telemetry_loop: TelemetryLoop,
    source: S,
    session: &Session,
) {
    let sink = (ConsoleSink, RecorderSink::new(Arc::clone(&session.recorder)));
    task_set.spawn(async move {
        let stats = telemetry_loop.run(source, sink).await;
        match stats.source_error {
            Some(e) => Err(anyhow::anyhow!("telemetry source failed: {e}")),
            None => Ok(TaskName::TelemetryLoop),
        }
    });
}

// ============================================================================
// Operator Console
// ============================================================================

/// Stdin reads cannot be cancelled, so they run on a detached thread that
/// dies with the process.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn spawn_operator_console(
    task_set: &mut JoinSet<Result<TaskName>>,
    session: Session,
    cancel_token: CancellationToken,
) {
    let mut commands = spawn_stdin_reader();
    task_set.spawn(async move {
        info!("⌨️  Operator console: note <text> | record | offset <name> <value> | status | quit");
        loop {
            let line = tokio::select! {
                _ = cancel_token.cancelled() => break,
                line = commands.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };
            if let Err(e) = handle_command(line.trim(), &session, &cancel_token).await {
                warn!("[Console] {:#}", e);
            }
        }
        Ok(TaskName::OperatorConsole)
    });
}

async fn handle_command(line: &str, session: &Session, cancel_token: &CancellationToken) -> Result<()> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "note" => {
            session.recorder()?.add_note(rest.trim())?;
            info!("[Console] Note added");
        }
        "record" => {
            session.recorder()?.toggle_recording();
        }
        "offset" => {
            let mut parts = rest.split_whitespace();
            let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
                anyhow::bail!("usage: offset <name> <value>");
            };
            let (name, value) = parse_offset(&format!("{name}={value}")).map_err(anyhow::Error::msg)?;
            if !session.set_offset(&name, value).await? {
                info!("[Console] Offset '{}' unchanged (zero values are ignored)", name);
            }
        }
        "status" => {
            let offsets = session.offsets.read().await.clone();
            let recorder = session.recorder()?;
            info!(
                "[Console] Save file: {} | Recording: {} | Last record: {}",
                recorder
                    .prefix()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(none)".to_string()),
                if recorder.is_recording() { "On" } else { "Off" },
                recorder.last_record_label()
            );
            for (name, value) in offsets.iter() {
                info!("[Console]   offset {} = {}", name, value);
            }
        }
        "quit" | "exit" => {
            info!("🛑 Quit requested from console");
            cancel_token.cancel();
        }
        other => anyhow::bail!("unknown command '{other}'"),
    }
    Ok(())
}

// ============================================================================
// Winch Depth
// ============================================================================

fn spawn_winch_depth(
    task_set: &mut JoinSet<Result<TaskName>>,
    config: &LoggerConfig,
    latest: Arc<Mutex<Option<f64>>>,
    cancel_token: CancellationToken,
) {
    let url = config.publish.redis_url.clone();
    let key = config.publish.key.clone();
    task_set.spawn(async move {
        let mut publisher = RedisPublisher::connect(&url)
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        let mut interval = tokio::time::interval(WINCH_DEPTH_REFRESH);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = interval.tick() => {}
            }
            let depth = match publisher.latest(&key).await {
                Ok(payload) => payload.map(|p| p.depth),
                Err(e) => {
                    warn!("[WinchDepth] {}", e);
                    None
                }
            };
            if let Ok(mut slot) = latest.lock() {
                *slot = depth;
            }
        }
        Ok(TaskName::WinchDepth)
    });
}

// ============================================================================
// Supervisor
// ============================================================================

/// Monitor tasks. The session ends when the telemetry loop ends; any task
/// failure cancels the rest.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");
    let mut failure = None;

    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(TaskName::TelemetryLoop)) => {
                info!("🔒 Supervisor: Telemetry finished, stopping remaining tasks");
                cancel_token.cancel();
            }
            Ok(Ok(task_name)) => {
                info!("🔒 Supervisor: Task {} completed normally", task_name);
            }
            Ok(Err(e)) => {
                error!("🔒 Supervisor: Task failed with error: {:#}", e);
                cancel_token.cancel();
                failure.get_or_insert(e);
            }
            Err(e) => {
                error!("🔒 Supervisor: Task panicked: {}", e);
                cancel_token.cancel();
                failure.get_or_insert(anyhow::anyhow!("Task panicked: {}", e));
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    // Load configuration; an explicit --config must load
    let logger_config = match &args.config {
        Some(path) => LoggerConfig::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => LoggerConfig::load(),
    };
    config::init(logger_config);
    let cfg = config::get();

    let mode = args.mode.unwrap_or(cfg.telemetry.mode);
    let decoder = LineDecoder::new(mode).context("failed to build line grammar")?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  DL20 Logger");
    info!("  Profiler telemetry: {} grammar", mode);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    // Session state
    let mut recorder = Recorder::new();
    let record_prefix = args
        .record
        .clone()
        .or_else(|| cfg.recording.prefix.as_ref().map(PathBuf::from));
    if let Some(prefix) = record_prefix {
        recorder.select_prefix(prefix);
        recorder.set_recording(args.record.is_some() || cfg.recording.autostart);
    }
    let session = Session {
        recorder: Arc::new(Mutex::new(recorder)),
        offsets: Arc::new(RwLock::new(cfg.offsets.clone())),
    };
    for (name, value) in &args.offsets {
        session.set_offset(name, *value).await?;
    }

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    let mut telemetry_loop = TelemetryLoop::new(decoder, Arc::clone(&session.offsets), cancel_token.clone());

    if args.winch_depth {
        info!("📏 depth_winch from Redis key '{}'", cfg.publish.key);
        let latest = Arc::new(Mutex::new(None));
        spawn_winch_depth(&mut task_set, cfg, Arc::clone(&latest), cancel_token.clone());
        let provider: Arc<dyn WinchDepthProvider> =
            Arc::new(move || latest.lock().ok().and_then(|slot| *slot));
        telemetry_loop = telemetry_loop.with_winch_depth(provider);
    }

    // Dispatch on the input source
    if let Some(path) = &args.replay {
        let delay = args
            .delay
            .unwrap_or_else(|| cfg.telemetry.replay_delay());
        info!("📥 Input: replay of {} ({:?} between lines)", path.display(), delay);
        let source = ReplaySource::open(path, delay).await?;
        spawn_telemetry(&mut task_set, telemetry_loop, source, &session);
        spawn_operator_console(&mut task_set, session.clone(), cancel_token.clone());
    } else if args.stdin {
        info!("📥 Input: stdin (operator console disabled)");
        spawn_telemetry(&mut task_set, telemetry_loop, StdinSource::new(), &session);
    } else {
        let port = args
            .serial
            .clone()
            .unwrap_or_else(|| cfg.telemetry.serial.port.clone());
        if port.is_empty() {
            anyhow::bail!("no telemetry input: pass --serial PORT, --replay FILE or --stdin");
        }
        info!(
            "📥 Input: serial {} ({} baud, {}{}{})",
            port,
            cfg.telemetry.serial.baud_rate,
            cfg.telemetry.serial.data_bits,
            cfg.telemetry.serial.parity,
            cfg.telemetry.serial.stop_bits
        );
        let source = SerialSource::open(&port, &cfg.telemetry.serial)?;
        spawn_telemetry(&mut task_set, telemetry_loop, source, &session);
        spawn_operator_console(&mut task_set, session.clone(), cancel_token.clone());
    }

    run_supervisor(&mut task_set, cancel_token).await?;

    info!("");
    info!("✓ DL20 Logger shutdown complete");
    Ok(())
}
