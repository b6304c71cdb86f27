//! Winch Encoder - Codex 560 depth counter to Redis
//!
//! Polls the winch's Kübler Codex 560 counter over Modbus RTU, estimates the
//! cable speed and publishes `{"depth", "velocity"}` under a Redis key for
//! the logger and anything else on the network.
//!
//! # Usage
//!
//! ```bash
//! # Search /dev/ttyUSB* for the counter, publish to the local Redis
//! winch-encoder
//!
//! # Explicit port, smoothed velocity
//! winch-encoder --port /dev/ttyUSB1 --smoothing
//!
//! # Print the counter's registers and exit
//! winch-encoder --info
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dl20_logger::config::{self, LoggerConfig};
use dl20_logger::encoder::codex560::connect;
use dl20_logger::encoder::{Codex560, Counter, EncoderLoop, ModbusRegisters, Preset, RedisPublisher};

#[derive(Parser, Debug)]
#[command(name = "winch-encoder")]
#[command(about = "Publish winch depth and velocity from a Codex 560 counter")]
#[command(version)]
struct Args {
    /// Counter serial port (default: [encoder.link] port, then /dev/ttyUSB* search)
    #[arg(long, value_name = "PORT")]
    port: Option<String>,

    /// Modbus slave address
    #[arg(long)]
    slave: Option<u8>,

    /// Redis URL (default: [publish] redis_url)
    #[arg(long, env = "DL20_REDIS_URL")]
    redis_url: Option<String>,

    /// Redis key (default: [publish] key)
    #[arg(long)]
    key: Option<String>,

    /// Publish the weight-blended velocity instead of the raw difference
    #[arg(long)]
    smoothing: bool,

    /// Poll interval in milliseconds (default: [encoder] poll_interval_ms)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Config file (default: $DL20_CONFIG, then ./dl20_logger.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the counter's registers and exit
    #[arg(long)]
    info: bool,

    /// Zero the main counter before polling
    #[arg(long)]
    reset: bool,
}

/// Dump everything the counter exposes.
async fn print_device_info(port: &str, device: &mut Codex560<ModbusRegisters>) -> Result<()> {
    let status = device.read_status().await?;
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Codex 560 on {}", port);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("   Main counter:         {}", device.read_main_counter().await?);
    info!("   Secondary counter:    {}", device.read_secondary_counter().await?);
    info!("   Preset 1:             {}", device.read_preset(Preset::One).await?);
    info!("   Preset 2:             {}", device.read_preset(Preset::Two).await?);
    info!("   Decimal places:       {}", device.read_decimal_places().await?);
    info!("   Status bytes:         {:02x?}", status);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut logger_config = match &args.config {
        Some(path) => LoggerConfig::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => LoggerConfig::load(),
    };

    // CLI flags override file values
    if let Some(port) = args.port {
        logger_config.encoder.link.port = port;
    }
    if let Some(slave) = args.slave {
        logger_config.encoder.link.slave = slave;
    }
    if let Some(url) = args.redis_url {
        logger_config.publish.redis_url = url;
    }
    if let Some(key) = args.key {
        logger_config.publish.key = key;
    }
    if let Some(ms) = args.interval_ms {
        logger_config.encoder.poll_interval_ms = ms;
    }
    logger_config.encoder.smoothing |= args.smoothing;
    logger_config.validate()?;
    config::init(logger_config);
    let cfg = config::get();

    let (port, mut device) = connect(&cfg.encoder.link)
        .await
        .context("no Codex 560 counter found")?;

    if args.info {
        return print_device_info(&port, &mut device).await;
    }

    if args.reset {
        device.reset_counter(Counter::Main).await?;
        info!("Main counter reset");
    }

    let publisher = RedisPublisher::connect(&cfg.publish.redis_url)
        .await
        .with_context(|| format!("failed to connect to {}", cfg.publish.redis_url))?;

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    info!("📤 Publishing to {} key '{}'", cfg.publish.redis_url, cfg.publish.key);
    let settings = cfg.encoder.loop_settings(&cfg.publish.key);
    let stats = EncoderLoop::new(device, publisher, settings, cancel_token)
        .run()
        .await
        .with_context(|| format!("counter on {port} failed"))?;

    if stats.publish_failures > 0 {
        warn!("{} publish failures during the session", stats.publish_failures);
    }
    info!("✓ Winch encoder shutdown complete");
    Ok(())
}
