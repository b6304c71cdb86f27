//! DL20 Profiler Simulation
//!
//! Generates DL20 telemetry lines for testing the logger without the
//! instrument. Simulates a single cast:
//! - Surface soak
//! - Descent at constant winch speed
//! - Ascent back to the surface
//!
//! Lines carry valid checksums; `--corrupt` damages a fraction of the
//! sub-messages so the NaN path can be exercised.
//!
//! # Usage
//! ```bash
//! ./dl20-simulator --rate 2 | ./dl20-logger --stdin
//! ./dl20-simulator --count 500 --speed 0 --corrupt 0.05 > cast.raw
//! ```

use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::io::{self, Write};
use std::time::{Duration, Instant};

use dl20_logger::acquisition::seal;

// ============================================================================
// Instrument Constants
// ============================================================================

/// Surface pressure (bar)
const ATMOSPHERE_BAR: f64 = 1.013;
/// Seawater pressure gradient (bar/m)
const BAR_PER_METRE: f64 = 0.1005;
/// Vertical separation of the two pressure sensors (m)
const SENSOR_SEPARATION: f64 = 0.5;
/// Surface water temperature (°C)
const SURFACE_TEMPERATURE: f64 = 14.0;
/// Deep water temperature (°C)
const DEEP_TEMPERATURE: f64 = 4.0;
/// Thermocline e-folding depth (m)
const THERMOCLINE_SCALE: f64 = 40.0;
/// Surface soak before descent (s)
const SOAK_SECONDS: f64 = 20.0;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "dl20-simulator")]
#[command(about = "DL20 profiler telemetry simulation for logger testing")]
#[command(version = "1.0")]
struct Args {
    /// Maximum cast depth (m)
    #[arg(long, default_value = "100")]
    max_depth: f64,

    /// Winch speed (m/s)
    #[arg(long, default_value = "0.8")]
    winch_speed: f64,

    /// Lines per second of simulated time
    #[arg(long, default_value = "1", value_parser = parse_rate)]
    rate: f64,

    /// Time compression factor (1 = real-time, 0 = no delay)
    #[arg(short, long, default_value = "1")]
    speed: u32,

    /// Stop after this many lines (default: one full cast)
    #[arg(long)]
    count: Option<u64>,

    /// Fraction of sub-messages whose checksum is broken (0.0-1.0)
    #[arg(long, default_value = "0.0")]
    corrupt: f64,

    /// Suppress mission log (only output telemetry)
    #[arg(short, long)]
    quiet: bool,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

/// Slowest and fastest line rates (Hz); outside this range the sample
/// interval is not a usable `Duration`.
const MIN_RATE: f64 = 0.001;
const MAX_RATE: f64 = 1000.0;

fn parse_rate(text: &str) -> Result<f64, String> {
    let rate: f64 = text
        .trim()
        .parse()
        .map_err(|_| format!("'{text}' is not a number"))?;
    if rate.is_finite() && (MIN_RATE..=MAX_RATE).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("rate must be between {MIN_RATE} and {MAX_RATE} Hz"))
    }
}

// ============================================================================
// Cast Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Soak,
    Descent,
    Ascent,
    Done,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Soak => "Surface Soak",
            Phase::Descent => "Descent",
            Phase::Ascent => "Ascent",
            Phase::Done => "Recovered",
        }
    }
}

// ============================================================================
// Simulation State
// ============================================================================

struct SimulationState {
    rng: StdRng,
    phase: Phase,
    sim_time_seconds: f64,
    depth: f64,
    max_depth: f64,
    winch_speed: f64,
    heading: f64,
    record_number: u64,
    corrupt_rate: f64,
    corrupted_blocks: u64,

    small_noise: Normal<f64>,
    attitude_noise: Normal<f64>,
}

impl SimulationState {
    fn new(args: &Args) -> Result<Self, rand_distr::NormalError> {
        let rng = match args.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            rng,
            phase: Phase::Soak,
            sim_time_seconds: 0.0,
            depth: 0.0,
            max_depth: args.max_depth.max(1.0),
            winch_speed: args.winch_speed.max(0.01),
            heading: 180.0,
            record_number: 0,
            corrupt_rate: args.corrupt.clamp(0.0, 1.0),
            corrupted_blocks: 0,
            small_noise: Normal::new(0.0, 0.002)?,
            attitude_noise: Normal::new(0.0, 0.8)?,
        })
    }

    /// Advance the cast by `dt` seconds. Returns true on a phase change.
    fn step(&mut self, dt: f64) -> bool {
        self.sim_time_seconds += dt;
        let before = self.phase;
        match self.phase {
            Phase::Soak if self.sim_time_seconds >= SOAK_SECONDS => self.phase = Phase::Descent,
            Phase::Descent => {
                self.depth += self.winch_speed * dt;
                if self.depth >= self.max_depth {
                    self.depth = self.max_depth;
                    self.phase = Phase::Ascent;
                }
            }
            Phase::Ascent => {
                self.depth -= self.winch_speed * dt;
                if self.depth <= 0.0 {
                    self.depth = 0.0;
                    self.phase = Phase::Done;
                }
            }
            _ => {}
        }
        before != self.phase
    }

    fn temperature_at(&self, depth: f64) -> f64 {
        DEEP_TEMPERATURE
            + (SURFACE_TEMPERATURE - DEEP_TEMPERATURE) * (-depth.max(0.0) / THERMOCLINE_SCALE).exp()
    }

    /// One depth/pressure/temperature block for a sensor at `depth`.
    fn dpt_block(&mut self, depth: f64) -> String {
        let depth = depth + self.small_noise.sample(&mut self.rng);
        let pressure = ATMOSPHERE_BAR + depth.max(0.0) * BAR_PER_METRE;
        let temperature = self.temperature_at(depth) + self.small_noise.sample(&mut self.rng);
        self.maybe_corrupt(seal(&format!(
            "ISDPT,{depth:.2},M,{pressure:.3},B,{temperature:.2},C"
        )))
    }

    fn hpr_block(&mut self) -> String {
        self.heading = (self.heading + self.attitude_noise.sample(&mut self.rng)).rem_euclid(360.0);
        let pitch = self.attitude_noise.sample(&mut self.rng);
        let roll = self.attitude_noise.sample(&mut self.rng);
        self.maybe_corrupt(seal(&format!(
            "ISHPR,{:.1},{pitch:.2},{roll:.2}",
            self.heading
        )))
    }

    /// Replace one payload digit with a different one, which always breaks
    /// the XOR checksum.
    fn maybe_corrupt(&mut self, block: String) -> String {
        if self.corrupt_rate <= 0.0 || !self.rng.gen_bool(self.corrupt_rate) {
            return block;
        }
        let payload_len = block.len().saturating_sub(dl20_logger::acquisition::checksum::SUFFIX_LEN);
        let digits: Vec<usize> = block[..payload_len]
            .char_indices()
            .filter(|(_, c)| c.is_ascii_digit())
            .map(|(i, _)| i)
            .collect();
        let Some(&at) = digits.choose(&mut self.rng) else {
            return block;
        };
        let mut bytes = block.into_bytes();
        bytes[at] = if bytes[at] == b'9' { b'0' } else { bytes[at] + 1 };
        self.corrupted_blocks += 1;
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn generate_line(&mut self) -> String {
        self.record_number += 1;
        let transducer_top = 20_000 + (self.depth * 150.0) as i64 + self.rng.gen_range(-3..=3);
        let transducer_bottom =
            20_000 + ((self.depth + SENSOR_SEPARATION) * 150.0) as i64 + self.rng.gen_range(-3..=3);
        let temperature_voltage = 2_400 + self.rng.gen_range(-2..=2);
        let hpr = self.hpr_block();
        let top = self.dpt_block(self.depth);
        let bottom = self.dpt_block(self.depth + SENSOR_SEPARATION);
        format!(
            "{}\t{}\t{}\t{}\t0\t{}\t{}\t{}",
            self.record_number, transducer_top, transducer_bottom, temperature_voltage, hpr, top, bottom
        )
    }
}

// ============================================================================
// Mission Log
// ============================================================================

fn format_time(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u32;
    let minutes = ((seconds % 3600.0) / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

fn log_mission(time: f64, message: &str, quiet: bool) {
    if !quiet {
        eprintln!("[{}] {}", format_time(time), message);
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut state = SimulationState::new(&args)?;

    let rate = args.rate;
    let sample_interval_sim = 1.0 / rate;
    let sample_interval_real = (args.speed > 0)
        .then(|| Duration::from_secs_f64(sample_interval_sim / args.speed as f64));

    log_mission(0.0, &"=".repeat(70), args.quiet);
    log_mission(0.0, "DL20 PROFILER SIMULATION v1.0", args.quiet);
    log_mission(0.0, &"=".repeat(70), args.quiet);
    log_mission(0.0, &format!("  Max depth: {:.1} m", state.max_depth), args.quiet);
    log_mission(0.0, &format!("  Winch speed: {:.2} m/s", state.winch_speed), args.quiet);
    log_mission(0.0, &format!("  Line rate: {rate} Hz"), args.quiet);
    log_mission(0.0, &format!("  Corrupt rate: {:.1}%", state.corrupt_rate * 100.0), args.quiet);
    if let Some(seed) = args.seed {
        log_mission(0.0, &format!("  Random seed: {}", seed), args.quiet);
    }
    log_mission(0.0, &"=".repeat(70), args.quiet);

    let start_time = Instant::now();
    let stdout = io::stdout();
    let mut stdout_lock = stdout.lock();

    loop {
        if let Some(count) = args.count {
            if state.record_number >= count {
                break;
            }
        } else if state.phase == Phase::Done {
            break;
        }
        let loop_start = Instant::now();

        let line = state.generate_line();
        writeln!(stdout_lock, "{line}")?;
        stdout_lock.flush()?;

        if state.step(sample_interval_sim) {
            log_mission(
                state.sim_time_seconds,
                &format!(">>> PHASE: {} (depth {:.1} m)", state.phase.name(), state.depth),
                args.quiet,
            );
        }

        if let Some(interval) = sample_interval_real {
            let elapsed = loop_start.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
    }

    drop(stdout_lock);

    log_mission(state.sim_time_seconds, &"=".repeat(70), args.quiet);
    log_mission(state.sim_time_seconds, "SIMULATION COMPLETE", args.quiet);
    log_mission(state.sim_time_seconds, &format!("Total lines: {}", state.record_number), args.quiet);
    log_mission(
        state.sim_time_seconds,
        &format!("Corrupted blocks: {}", state.corrupted_blocks),
        args.quiet,
    );
    log_mission(
        state.sim_time_seconds,
        &format!("Real time: {:.1}s", start_time.elapsed().as_secs_f64()),
        args.quiet,
    );
    log_mission(state.sim_time_seconds, &"=".repeat(70), args.quiet);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate_bounds() {
        assert_eq!(parse_rate("2").unwrap(), 2.0);
        for bad in ["0", "1e-300", "inf", "NaN", "-1", "fast"] {
            assert!(parse_rate(bad).is_err(), "{bad} should be rejected");
        }
    }
}
