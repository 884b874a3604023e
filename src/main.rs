//! mda-bridge - Simulated Acquisition Demo
//!
//! Runs the synchronization engine against a simulated microscope and
//! reports what a viewer would have seen.
//!
//! # Usage
//!
//! ```bash
//! mda-bridge --timepoints 10 --channels 2 --z-slices 5
//! mda-bridge --config bridge.toml --split-channels --save run.mdajsonl
//! ```

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use mda_bridge::{
    config::{BridgeConfig, LoggingSettings},
    engine::{SimulatedAcquisition, SimulatedCore, SyncEngine},
    notify::Notification,
    types::{axis, AcquisitionShape},
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "mda-bridge")]
#[command(about = "Acquisition synchronization engine demo with a simulated microscope", long_about = None)]
struct Cli {
    /// Configuration file (TOML or JSON); defaults to the app data directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Time points to acquire along the unbounded time axis
    #[arg(long, default_value_t = 5)]
    timepoints: usize,

    /// Number of channels
    #[arg(long, default_value_t = 2)]
    channels: usize,

    /// Number of z slices
    #[arg(long, default_value_t = 3)]
    z_slices: usize,

    /// Pause between simulated frames in milliseconds
    #[arg(long, default_value_t = 0)]
    frame_interval_ms: u64,

    /// Store each channel as its own session
    #[arg(long)]
    split_channels: bool,

    /// Save the completed sequence to this file; split layers get a suffix
    #[arg(long)]
    save: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn init_logging(settings: &LoggingSettings) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match &settings.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mda-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => BridgeConfig::load_or_default(None),
    };

    if cli.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&config.logging);
    tracing::info!("Starting acquisition bridge demo");

    let core = SimulatedCore::default();
    let (engine, sender, bridge) = SyncEngine::new(config);
    let engine_handle = engine.with_core(Box::new(core.clone())).spawn()?;

    bridge.subscribe_state_changes(|name, value, revision| {
        tracing::debug!("{} = {} (revision {})", name, value, revision);
    });

    let shape = AcquisitionShape::from_pairs([
        (axis::TIME, None),
        (axis::CHANNEL, Some(cli.channels)),
        (axis::Z, Some(cli.z_slices)),
    ])?;
    let mut acquisition = SimulatedAcquisition::new("demo", shape, &core)
        .with_unbounded_length(cli.timepoints)
        .with_frame_interval(Duration::from_millis(cli.frame_interval_ms))
        .with_split_channels(cli.split_channels);
    if let Some(path) = &cli.save {
        acquisition = acquisition.with_save_path(path);
    }

    let producer = acquisition.spawn(sender.clone())?;
    let delivered = producer
        .join()
        .map_err(|_| anyhow!("Simulator thread panicked"))??;

    sender.shutdown()?;
    engine_handle
        .join()
        .map_err(|_| anyhow!("Engine thread panicked"))?;

    let notifications = bridge.drain();
    let regions = notifications
        .iter()
        .filter(|n| matches!(n, Notification::RegionUpdated { .. }))
        .count();
    for n in &notifications {
        match n {
            Notification::SessionFailed { message, .. } => {
                tracing::error!("Session failed: {}", message);
            }
            Notification::RecoverableError { message, .. } => {
                tracing::warn!("{}", message);
            }
            Notification::SessionSaved { session_id, path, planes } => {
                println!("Saved session {} ({} planes) to {}", session_id, planes, path.display());
            }
            _ => {}
        }
    }

    println!("Delivered {} frames, {} region updates", delivered, regions);
    for summary in bridge.list_sessions() {
        println!(
            "Session {} '{}'{} {}: {} frames, shape {}, capacity {:?}",
            summary.id,
            summary.name,
            summary.layer.map(|l| format!(" [{}]", l)).unwrap_or_default(),
            summary.status,
            summary.frames,
            summary.shape,
            summary.capacity
        );
    }

    let stats = bridge.stats();
    println!(
        "Events: {}, frames written: {} ({:.1}%), overflows: {}, dropped notifications: {}",
        stats.events_processed,
        stats.frames_written,
        stats.write_rate(),
        stats.channel_overflows,
        stats.notifications_dropped
    );

    tracing::info!("Shutting down...");
    Ok(())
}
