//! Counter polling loop: read → estimate → publish, one cycle at a time.

use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codex560::Codex560;
use super::publish::{EncoderPayload, PublishSink};
use super::registers::{CounterError, RegisterAccess};
use super::velocity::{estimate, DecayConstants, EstimatorState, Sample, SmoothedVelocity};

/// Loop tuning.
#[derive(Debug, Clone)]
pub struct EncoderLoopSettings {
    pub poll_interval: Duration,
    pub constants: DecayConstants,
    pub smoothing: bool,
    pub key: String,
    /// Stop after this many publish failures in a row (0 = never)
    pub max_publish_failures: u32,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncoderStats {
    pub polls: u64,
    pub published: u64,
    pub timeouts: u64,
    pub rejected_steps: u64,
    pub publish_failures: u64,
    pub last_payload: Option<EncoderPayload>,
}

/// Polls the counter and publishes depth and velocity.
pub struct EncoderLoop<R: RegisterAccess, P: PublishSink> {
    device: Codex560<R>,
    sink: P,
    settings: EncoderLoopSettings,
    cancel_token: CancellationToken,
}

impl<R: RegisterAccess, P: PublishSink> EncoderLoop<R, P> {
    pub fn new(
        device: Codex560<R>,
        sink: P,
        settings: EncoderLoopSettings,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            device,
            sink,
            settings,
            cancel_token,
        }
    }

    /// Run until cancelled or the counter reports a non-timeout error.
    ///
    /// The first good reading seeds the estimator and is published with zero
    /// velocity.
    pub async fn run(mut self) -> Result<EncoderStats, CounterError> {
        let started = Instant::now();
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut state: Option<EstimatorState> = None;
        let mut smoothed = self.settings.smoothing.then(SmoothedVelocity::new);
        let mut stats = EncoderStats::default();
        let mut consecutive_failures = 0u32;

        info!(
            "📏 Polling counter every {:?} (tau_time={}s, tau_depth={}m, smoothing={})",
            self.settings.poll_interval,
            self.settings.constants.tau_time,
            self.settings.constants.tau_depth,
            self.settings.smoothing
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    info!("[EncoderLoop] Shutdown signal received after {} polls", stats.polls);
                    break;
                }
                _ = interval.tick() => {}
            }

            let position = match self.device.read_main_counter().await {
                Ok(p) => p,
                Err(e) if e.is_timeout() => {
                    stats.timeouts += 1;
                    debug!("[EncoderLoop] {}", e);
                    continue;
                }
                Err(e) => {
                    error!("[EncoderLoop] Counter error: {}", e);
                    return Err(e);
                }
            };
            stats.polls += 1;

            if !position.is_finite() {
                stats.rejected_steps += 1;
                warn!("[EncoderLoop] Skipping non-finite counter reading: {}", position);
                continue;
            }

            let sample = Sample {
                position,
                timestamp: started.elapsed().as_secs_f64(),
            };

            let velocity = match state {
                None => {
                    state = Some(EstimatorState::new(sample.position, sample.timestamp));
                    0.0
                }
                Some(prev) => match estimate(prev, sample, &self.settings.constants) {
                    Ok((next, est)) => {
                        state = Some(next);
                        match smoothed.as_mut() {
                            Some(s) => s.update(&est),
                            None => est.velocity,
                        }
                    }
                    Err(e) => {
                        stats.rejected_steps += 1;
                        warn!("[EncoderLoop] Skipping sample: {}", e);
                        continue;
                    }
                },
            };

            let payload = EncoderPayload {
                depth: position,
                velocity,
            };
            let published = match payload.to_json() {
                Ok(json) => self.sink.publish(&self.settings.key, &json).await,
                Err(e) => Err(e),
            };
            match published {
                Ok(()) => {
                    stats.published += 1;
                    stats.last_payload = Some(payload);
                    consecutive_failures = 0;
                }
                Err(e) => {
                    stats.publish_failures += 1;
                    consecutive_failures += 1;
                    warn!("[EncoderLoop] Publish failed: {}", e);
                    let limit = self.settings.max_publish_failures;
                    if limit > 0 && consecutive_failures >= limit {
                        error!(
                            "[EncoderLoop] {} consecutive publish failures, stopping",
                            consecutive_failures
                        );
                        break;
                    }
                }
            }
        }

        info!(
            "📊 Encoder loop finished: {} polls | {} published | {} timeouts | {} rejected",
            stats.polls, stats.published, stats.timeouts, stats.rejected_steps
        );
        Ok(stats)
    }
}
