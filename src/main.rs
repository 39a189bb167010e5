//! CLI Entry Point for ecg_stream
//!
//! Provides command-line interface for:
//! - Streaming from the simulated front end to a UDP receiver
//! - Listening for datagrams and printing the decoded records
//! - Validating and printing the effective configuration
//!
//! # Usage
//!
//! Stream with the default configuration file:
//! ```bash
//! ecg_stream stream --config config/ecg_stream.toml
//! ```
//!
//! Receive on the default port:
//! ```bash
//! ecg_stream listen --bind 0.0.0.0:5005
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ecg_stream::config::StreamConfig;
use ecg_stream::link::{link_channel, LinkState};
use ecg_stream::logging::{self, LoggingConfig};
use ecg_stream::receiver::DatagramReceiver;
use ecg_stream::sensor::{EdgeClock, SimulatedSensor};
use ecg_stream::{Pipeline, PipelineContext};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ecg_stream")]
#[command(about = "Real-time biosignal acquisition to UDP streaming", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline against the simulated front end
    Stream {
        /// Configuration file (defaults to config/ecg_stream.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Seconds between statistics log lines
        #[arg(long, default_value = "5")]
        stats_interval: u64,
    },

    /// Receive datagrams and print each record
    Listen {
        /// Local address to bind
        #[arg(long, default_value = "0.0.0.0:5005")]
        bind: SocketAddr,
    },

    /// Validate configuration and print the effective values
    CheckConfig {
        /// Configuration file (defaults to config/ecg_stream.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Stream {
            config,
            stats_interval,
        } => stream(config, stats_interval).await,
        Commands::Listen { bind } => listen(bind).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<StreamConfig> {
    let config = match &path {
        Some(path) => StreamConfig::load_from(path),
        None => StreamConfig::load(),
    }
    .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn stream(config_path: Option<PathBuf>, stats_interval: u64) -> Result<()> {
    let config = load_config(config_path)?;
    logging::init_from_config(&config)?;
    info!(name = %config.application.name, "Starting stream");

    let ctx = PipelineContext::from_config(&config)?;
    let reader = ctx.reader;
    let sensor = SimulatedSensor::with_calibration(reader.calibration, config.sensor.sample_rate_hz);

    // No connectivity layer on a host: the link is up from the start.
    let (_link, monitor) = link_channel(LinkState::Up);

    let pipeline = Pipeline::start(ctx, sensor, monitor)
        .await
        .context("Pipeline startup failed")?;
    let clock = EdgeClock::spawn(pipeline.gate().clone(), config.sensor.sample_rate_hz)?;

    let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = pipeline.stats().snapshot();
                info!(
                    produced = snapshot.samples_produced,
                    datagrams = snapshot.datagrams_sent,
                    edges_dropped = snapshot.edges_dropped,
                    queue_dropped = snapshot.queue_dropped,
                    send_failures = snapshot.send_failures,
                    "Pipeline statistics"
                );
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
        }
    }

    clock.abort();
    let snapshot = pipeline.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn listen(bind: SocketAddr) -> Result<()> {
    logging::init(LoggingConfig::default())?;

    let mut receiver = DatagramReceiver::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!(addr = %receiver.local_addr()?, "Listening for datagrams");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    let mut records_this_second = 0u64;

    loop {
        tokio::select! {
            received = receiver.recv_records() => match received {
                Ok((from, decoded)) => {
                    for error in &decoded.skipped {
                        warn!(%from, %error, "Skipping malformed record");
                    }
                    records_this_second += decoded.records.len() as u64;
                    for record in decoded.records {
                        print!("{record}");
                    }
                }
                Err(e) => return Err(e).context("Receive failed"),
            },
            _ = ticker.tick() => {
                info!(records_per_second = records_this_second, "Receive rate");
                records_this_second = 0;
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                return Ok(());
            }
        }
    }
}

fn check_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let destination = config.destination()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!("Configuration OK, streaming to {destination}");
    Ok(())
}
