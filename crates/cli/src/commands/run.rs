//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use super::load_config;
use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{FaultPlan, Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_stream(args: &RunArgs) -> Result<()> {
    if let Some(ref path) = args.config {
        info!(config = %path.display(), "Loading configuration");
    }
    let config = load_config(args.config.as_deref())?;

    if !(0.0..=1.0).contains(&args.drop_rate) {
        return Err(CliError::invalid_argument(
            "drop-rate",
            format!("{} is not a probability", args.drop_rate),
        )
        .into());
    }

    info!(
        buffers = config.buffer_count,
        packets = config.packets_per_transfer,
        lead_window = config.lead_window,
        startup_frames = config.startup_frames,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        stream: config,
        max_frames: if args.max_frames == 0 {
            None
        } else {
            Some(args.max_frames)
        },
        timeout: if args.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(args.timeout))
        },
        buffer_size: args.buffer_size,
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
        faults: FaultPlan {
            drop_rate: args.drop_rate,
            seed: args.seed,
            reorder_at: args.reorder_at.clone(),
            freeze_at: args.freeze_at,
            unplug_after: args.unplug_after_ms.map(Duration::from_millis),
        },
        log_every: args.log_every,
    };

    info!("Starting stream...");
    let stats = Pipeline::new(pipeline_config)
        .run(shutdown_signal())
        .await
        .context("Stream execution failed")?;

    info!(
        frames = stats.frames_received,
        gaps = stats.stream.sequence_gaps,
        stall_resets = stats.stream.stall_resets,
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        "Stream completed"
    );
    stats.print_summary();

    info!("Taxel stream finished");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
///
/// A handler that cannot be installed never resolves.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &contracts::StreamConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Ring:");
    println!(
        "  {} buffers x {} packets ({} positions per endpoint)",
        config.buffer_count,
        config.packets_per_transfer,
        config.ring_positions()
    );
    println!(
        "  Lead window: {} transfers ({} frames)",
        config.lead_window,
        config.lead_frames()
    );
    println!("\nSynchronizer:");
    println!("  Poll interval: {}us", config.poll_interval_us);
    println!("  Warm-up frames: {}", config.startup_frames);
    println!(
        "  Stall check: every {} cycles, threshold {}",
        config.stall.check_interval_cycles, config.stall.threshold
    );
    println!();
}
