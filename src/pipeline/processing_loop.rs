//! Telemetry processing loop shared across all input modes.
//!
//! A producer task reads lines from a [`LineSource`] and decodes them; the
//! consumer (the caller's task) hands each result to a [`RecordSink`]. The
//! two are joined by a capacity-1 channel, so delivery is ordered, lossless
//! and never more than one record ahead of the sink.

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{LineEvent, LineSource};
use crate::acquisition::{DecodeError, LineDecoder};
use crate::config::defaults::{HANDOFF_CAPACITY, PROGRESS_LOG_INTERVAL};
use crate::types::{Offsets, SensorRecord};

// ============================================================================
// Events & Sinks
// ============================================================================

/// One received line and what the decoder made of it.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    /// Monotonic per-session counter, starting at 1.
    pub sequence: u64,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub raw: String,
    pub outcome: Result<SensorRecord, DecodeError>,
}

impl TelemetryEvent {
    pub fn record(&self) -> Option<&SensorRecord> {
        self.outcome.as_ref().ok()
    }
}

/// Consumer side of the loop.
///
/// Errors are logged and counted; they never stop the loop.
pub trait RecordSink: Send + 'static {
    fn on_event(&mut self, event: &TelemetryEvent) -> anyhow::Result<()>;
}

/// Discard everything. Useful when only the statistics matter.
impl RecordSink for () {
    fn on_event(&mut self, _event: &TelemetryEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fan out to two sinks; both always see the event.
impl<A: RecordSink, B: RecordSink> RecordSink for (A, B) {
    fn on_event(&mut self, event: &TelemetryEvent) -> anyhow::Result<()> {
        let first = self.0.on_event(event);
        let second = self.1.on_event(event);
        first.and(second)
    }
}

/// Supplies the current winch cable-out depth for `depth_winch`.
pub trait WinchDepthProvider: Send + Sync + 'static {
    fn current_depth(&self) -> Option<f64>;
}

impl<F> WinchDepthProvider for F
where
    F: Fn() -> Option<f64> + Send + Sync + 'static,
{
    fn current_depth(&self) -> Option<f64> {
        self()
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub lines_received: u64,
    pub records_decoded: u64,
    /// Records with at least one NaN field (a failed block or number)
    pub records_degraded: u64,
    pub decode_errors: u64,
    pub timeouts: u64,
    pub sink_errors: u64,
    /// Set when a fatal transport error ended the loop
    pub source_error: Option<String>,
}

/// Producer-side counters, merged into [`LoopStats`] after join.
#[derive(Debug, Default)]
struct ProducerStats {
    lines_received: u64,
    timeouts: u64,
    source_error: Option<String>,
}

// ============================================================================
// Processing Loop
// ============================================================================

/// Owns everything needed to run one telemetry session.
///
/// Built with [`new()`](TelemetryLoop::new), optionally given a winch depth
/// provider, then consumed by [`run()`](TelemetryLoop::run).
pub struct TelemetryLoop {
    decoder: LineDecoder,
    offsets: Arc<RwLock<Offsets>>,
    cancel_token: CancellationToken,
    winch_depth: Option<Arc<dyn WinchDepthProvider>>,
}

impl TelemetryLoop {
    pub fn new(
        decoder: LineDecoder,
        offsets: Arc<RwLock<Offsets>>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            decoder,
            offsets,
            cancel_token,
            winch_depth: None,
        }
    }

    /// Fill `depth_winch` from `provider` on every decoded record.
    pub fn with_winch_depth(mut self, provider: Arc<dyn WinchDepthProvider>) -> Self {
        self.winch_depth = Some(provider);
        self
    }

    /// Run until the source is exhausted, fails, or the token is cancelled.
    ///
    /// The source is dropped (closing its transport) before this returns.
    pub async fn run<S: LineSource, K: RecordSink>(self, source: S, mut sink: K) -> LoopStats {
        let (tx, mut rx) = mpsc::channel::<TelemetryEvent>(HANDOFF_CAPACITY);

        info!(
            "📊 Processing DL20 telemetry from {} ({} grammar)...",
            source.source_name(),
            self.decoder.mode()
        );
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        let producer = tokio::spawn(produce(
            source,
            self.decoder,
            self.offsets,
            self.winch_depth,
            self.cancel_token,
            tx,
        ));

        let mut stats = LoopStats::default();

        // Drains until the producer drops its sender, so nothing already
        // decoded is lost on cancellation.
        while let Some(event) = rx.recv().await {
            match &event.outcome {
                Ok(record) => {
                    stats.records_decoded += 1;
                    if record.missing_count() > 0 {
                        stats.records_degraded += 1;
                        debug!(
                            sequence = event.sequence,
                            missing = record.missing_count(),
                            "Record decoded with missing fields"
                        );
                    }
                }
                Err(e) => {
                    stats.decode_errors += 1;
                    warn!(sequence = event.sequence, "[TelemetryLoop] Skipping line: {}", e);
                }
            }

            if let Err(e) = sink.on_event(&event) {
                stats.sink_errors += 1;
                warn!(sequence = event.sequence, "[TelemetryLoop] Sink error: {:#}", e);
            }

            if event.sequence % PROGRESS_LOG_INTERVAL == 0 {
                info!(
                    "📈 Progress: {} lines | Decoded: {} | Degraded: {} | Rejected: {}",
                    event.sequence, stats.records_decoded, stats.records_degraded, stats.decode_errors
                );
            }
        }

        match producer.await {
            Ok(p) => {
                stats.lines_received = p.lines_received;
                stats.timeouts = p.timeouts;
                stats.source_error = p.source_error;
            }
            Err(e) => {
                stats.source_error = Some(format!("producer task failed: {e}"));
            }
        }

        log_final_stats(&stats);
        stats
    }
}

/// Producer task: read, decode, hand off.
async fn produce<S: LineSource>(
    mut source: S,
    decoder: LineDecoder,
    offsets: Arc<RwLock<Offsets>>,
    winch_depth: Option<Arc<dyn WinchDepthProvider>>,
    cancel_token: CancellationToken,
    tx: mpsc::Sender<TelemetryEvent>,
) -> ProducerStats {
    let mut stats = ProducerStats::default();

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                info!("[TelemetryLoop] Shutdown signal received");
                break;
            }
            result = source.next_line() => result,
        };

        let raw = match result {
            Ok(LineEvent::Line(line)) => line,
            Ok(LineEvent::Eof) => {
                info!(
                    "[TelemetryLoop] Source reached end ({} lines received)",
                    stats.lines_received
                );
                break;
            }
            Err(e) if !e.is_fatal() => {
                stats.timeouts += 1;
                debug!("[TelemetryLoop] {}", e);
                continue;
            }
            Err(e) => {
                warn!("[TelemetryLoop] Source error: {}", e);
                stats.source_error = Some(e.to_string());
                break;
            }
        };

        stats.lines_received += 1;

        let outcome = {
            let offsets = offsets.read().await;
            decoder.decode(&raw, &offsets)
        };
        let outcome = match (outcome, &winch_depth) {
            (Ok(record), Some(provider)) => match provider.current_depth() {
                Some(depth) => Ok(record.with_winch_depth(depth)),
                None => Ok(record),
            },
            (outcome, _) => outcome,
        };

        let event = TelemetryEvent {
            sequence: stats.lines_received,
            received_at: chrono::Utc::now(),
            raw,
            outcome,
        };

        // Once read, a line is always delivered: the send is not raced
        // against cancellation.
        if tx.send(event).await.is_err() {
            warn!("[TelemetryLoop] Consumer gone, stopping");
            break;
        }
    }

    info!("[TelemetryLoop] Releasing {} source", source.source_name());
    drop(source);
    stats
}

fn log_final_stats(stats: &LoopStats) {
    info!("");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("📊 FINAL STATISTICS");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("   Lines Received:       {}", stats.lines_received);
    info!("   Records Decoded:      {}", stats.records_decoded);
    info!("   Records Degraded:     {}", stats.records_degraded);
    info!("   Lines Rejected:       {}", stats.decode_errors);
    info!("   Read Timeouts:        {}", stats.timeouts);
    info!("   Sink Errors:          {}", stats.sink_errors);
    if let Some(ref e) = stats.source_error {
        info!("   Stopped By:           {}", e);
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::source::SourceError;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Scripted source for driving the loop without I/O.
    struct Scripted {
        items: VecDeque<Result<LineEvent, SourceError>>,
    }

    #[async_trait::async_trait]
    impl LineSource for Scripted {
        async fn next_line(&mut self) -> Result<LineEvent, SourceError> {
            self.items.pop_front().unwrap_or(Ok(LineEvent::Eof))
        }
        fn source_name(&self) -> &str {
            "scripted"
        }
    }

    struct Collect(Arc<std::sync::Mutex<Vec<TelemetryEvent>>>);

    impl RecordSink for Collect {
        fn on_event(&mut self, event: &TelemetryEvent) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn good_line(n: u32) -> String {
        use crate::acquisition::seal;
        format!(
            "{n}\t1\t2\t3\t0\t{}\t{}\t{}",
            seal("ISHPR,1.0,2.0,3.0"),
            seal("ISDPT,1.00,M,1.000,B,1.00,C"),
            seal("ISDPT,2.00,M,1.500,B,1.00,C"),
        )
    }

    fn telemetry_loop() -> TelemetryLoop {
        TelemetryLoop::new(
            LineDecoder::positional(),
            Arc::new(RwLock::new(Offsets::default())),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_timeouts_are_skipped_and_order_is_kept() {
        let source = Scripted {
            items: VecDeque::from(vec![
                Ok(LineEvent::Line(good_line(1))),
                Err(SourceError::Timeout(Duration::from_secs(5))),
                Ok(LineEvent::Line("garbage".into())),
                Ok(LineEvent::Line(good_line(2))),
            ]),
        };
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let stats = telemetry_loop().run(source, Collect(seen.clone())).await;

        assert_eq!(stats.lines_received, 3);
        assert_eq!(stats.records_decoded, 2);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.timeouts, 1);
        assert!(stats.source_error.is_none());

        let seen = seen.lock().unwrap();
        let sequences: Vec<u64> = seen.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(seen[2].record().unwrap().record_number, 2.0);
    }

    #[tokio::test]
    async fn test_fatal_source_error_stops_loop() {
        let source = Scripted {
            items: VecDeque::from(vec![
                Ok(LineEvent::Line(good_line(1))),
                Err(SourceError::Io {
                    source_name: "scripted".into(),
                    error: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"),
                }),
                Ok(LineEvent::Line(good_line(2))),
            ]),
        };
        let stats = telemetry_loop().run(source, ()).await;
        assert_eq!(stats.records_decoded, 1);
        assert!(stats.source_error.unwrap().contains("unplugged"));
    }

    #[tokio::test]
    async fn test_winch_depth_provider_fills_record() {
        let source = Scripted {
            items: VecDeque::from(vec![Ok(LineEvent::Line(good_line(7)))]),
        };
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let provider: Arc<dyn WinchDepthProvider> = Arc::new(|| Some(123.5));
        telemetry_loop()
            .with_winch_depth(provider)
            .run(source, Collect(seen.clone()))
            .await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].record().unwrap().depth_winch, 123.5);
    }

    /// Source that always has a line ready.
    struct Endless;

    #[async_trait::async_trait]
    impl LineSource for Endless {
        async fn next_line(&mut self) -> Result<LineEvent, SourceError> {
            Ok(LineEvent::Line(good_line(1)))
        }
        fn source_name(&self) -> &str {
            "endless"
        }
    }

    #[tokio::test]
    async fn test_cancelled_loop_starts_no_reads() {
        for _ in 0..100 {
            let cancel_token = CancellationToken::new();
            cancel_token.cancel();
            let stats = TelemetryLoop::new(
                LineDecoder::positional(),
                Arc::new(RwLock::new(Offsets::default())),
                cancel_token,
            )
            .run(Endless, ())
            .await;
            assert_eq!(stats.lines_received, 0);
            assert_eq!(stats.records_decoded, 0);
        }
    }
}
