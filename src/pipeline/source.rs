//! Line source abstraction for DL20 telemetry ingestion.
//!
//! Provides a unified trait for reading raw telemetry lines from different
//! sources: a replay file, the DL20 serial port, and stdin (simulator pipe).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::acquisition::serial::{accept_length, mask_seven_bit, SerialSettings};

/// Events produced by a line source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// One non-empty line, trailing whitespace removed.
    Line(String),
    /// Source reached end of data (EOF for files/stdin, port closed).
    Eof,
}

/// Transport failures.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No data within the read deadline. The loop treats this as an empty
    /// cycle.
    #[error("no data within {0:?}")]
    Timeout(Duration),

    #[error("I/O error on {source_name}: {error}")]
    Io {
        source_name: String,
        #[source]
        error: std::io::Error,
    },

    #[error("failed to open serial port {port}: {error}")]
    Open {
        port: String,
        #[source]
        error: tokio_serial::Error,
    },
}

impl SourceError {
    /// Whether the loop must stop. Only timeouts are recoverable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SourceError::Timeout(_))
    }
}

/// Trait abstracting where telemetry lines come from.
///
/// Implementations handle framing and pacing internally. The processing loop
/// calls [`next_line`](LineSource::next_line) in a `select!` with
/// cancellation, so implementations must be cancel safe: a partially read
/// line is kept and completed by the next call.
#[async_trait]
pub trait LineSource: Send + 'static {
    /// Read the next line.
    ///
    /// Returns `LineEvent::Eof` when no more data is available,
    /// `Err(SourceError::Timeout)` when nothing arrived in time.
    async fn next_line(&mut self) -> Result<LineEvent, SourceError>;

    /// Human-readable name for logging (e.g. "replay", "serial", "stdin").
    fn source_name(&self) -> &str;
}

/// Shared line framing over any async reader.
///
/// `pending` survives cancellation so a line interrupted by a deadline is
/// completed on the next call rather than split in two.
struct LineFramer<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> LineFramer<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::with_capacity(128),
        }
    }

    /// Next raw line including its terminator, or `None` at EOF.
    async fn next_raw(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let n = self.reader.read_until(b'\n', &mut self.pending).await?;
        if n == 0 && self.pending.is_empty() {
            return Ok(None);
        }
        Ok(Some(std::mem::take(&mut self.pending)))
    }
}

// ============================================================================
// Replay Source (recorded raw file)
// ============================================================================

/// Replays a recorded `.raw` file, one line per `delay`.
pub struct ReplaySource {
    path: PathBuf,
    framer: LineFramer<tokio::fs::File>,
    delay: Duration,
    yielded_first: bool,
}

impl ReplaySource {
    pub async fn open(path: &Path, delay: Duration) -> Result<Self, SourceError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|error| SourceError::Io {
                source_name: path.display().to_string(),
                error,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            framer: LineFramer::new(file),
            delay,
            yielded_first: false,
        })
    }
}

#[async_trait]
impl LineSource for ReplaySource {
    async fn next_line(&mut self) -> Result<LineEvent, SourceError> {
        // No delay before the first line
        if self.yielded_first && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        loop {
            let raw = self
                .framer
                .next_raw()
                .await
                .map_err(|error| SourceError::Io {
                    source_name: self.path.display().to_string(),
                    error,
                })?;
            let Some(raw) = raw else {
                return Ok(LineEvent::Eof);
            };
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            if line.is_empty() {
                continue;
            }
            self.yielded_first = true;
            return Ok(LineEvent::Line(line));
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

// ============================================================================
// Serial Source (DL20 RS-232 link)
// ============================================================================

/// Reads telemetry from the DL20 serial port.
///
/// Bytes are masked to 7 bits and lines with the wrong raw length are
/// dropped before they reach the decoder.
pub struct SerialSource {
    port: String,
    framer: LineFramer<tokio_serial::SerialStream>,
    timeout: Duration,
    expected_length: Option<usize>,
    dropped: u64,
}

impl SerialSource {
    pub fn open(port: &str, settings: &SerialSettings) -> Result<Self, SourceError> {
        let stream = tokio_serial::SerialStream::open(&settings.builder(port)).map_err(|error| {
            SourceError::Open {
                port: port.to_string(),
                error,
            }
        })?;
        tracing::info!(
            port = %port,
            baud = settings.baud_rate,
            line_length = settings.line_length,
            "Serial port opened"
        );
        Ok(Self {
            port: port.to_string(),
            framer: LineFramer::new(stream),
            timeout: settings.read_timeout(),
            expected_length: settings.expected_length(),
            dropped: 0,
        })
    }

    /// Lines discarded by the length filter so far.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped
    }
}

#[async_trait]
impl LineSource for SerialSource {
    async fn next_line(&mut self) -> Result<LineEvent, SourceError> {
        loop {
            let raw = match tokio::time::timeout(self.timeout, self.framer.next_raw()).await {
                Err(_) => return Err(SourceError::Timeout(self.timeout)),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(SourceError::Timeout(self.timeout))
                }
                Ok(Err(error)) => {
                    return Err(SourceError::Io {
                        source_name: self.port.clone(),
                        error,
                    })
                }
                Ok(Ok(None)) => return Ok(LineEvent::Eof),
                Ok(Ok(Some(raw))) => raw,
            };

            if !accept_length(raw.len(), self.expected_length) {
                self.dropped += 1;
                tracing::debug!(
                    length = raw.len(),
                    dropped = self.dropped,
                    "Dropping line with unexpected length"
                );
                continue;
            }

            let line = mask_seven_bit(&raw);
            if line.is_empty() {
                continue;
            }
            return Ok(LineEvent::Line(line));
        }
    }

    fn source_name(&self) -> &str {
        "serial"
    }
}

// ============================================================================
// Stdin Source (simulator pipe)
// ============================================================================

/// Reads raw telemetry lines from stdin.
///
/// Used with the simulator: `dl20-simulator | dl20-logger --stdin`
pub struct StdinSource {
    framer: LineFramer<tokio::io::Stdin>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            framer: LineFramer::new(tokio::io::stdin()),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineSource for StdinSource {
    async fn next_line(&mut self) -> Result<LineEvent, SourceError> {
        loop {
            let raw = self
                .framer
                .next_raw()
                .await
                .map_err(|error| SourceError::Io {
                    source_name: "stdin".to_string(),
                    error,
                })?;
            let Some(raw) = raw else {
                return Ok(LineEvent::Eof);
            };
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            if !line.is_empty() {
                return Ok(LineEvent::Line(line));
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}
