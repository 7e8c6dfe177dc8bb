//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{StreamConfig, ENDPOINT_COUNT, SENSOR_COLUMNS, SENSOR_ROWS};
use serde::Serialize;
use tracing::info;

use super::load_config;
use crate::cli::InfoArgs;

/// Device frame length at full speed
const FRAME_MS: f64 = 1.0;

/// Configuration-derived figures for JSON output
#[derive(Debug, Serialize)]
struct StreamInfo {
    sensor: SensorInfo,
    ring: RingInfo,
    timing: TimingInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    carriers: Vec<u8>,
}

#[derive(Debug, Serialize)]
struct SensorInfo {
    columns: usize,
    rows: usize,
    endpoints: usize,
}

#[derive(Debug, Serialize)]
struct RingInfo {
    buffer_count: usize,
    packets_per_transfer: usize,
    positions_per_endpoint: usize,
    lead_window: usize,
    transfers_in_flight: usize,
}

#[derive(Debug, Serialize)]
struct TimingInfo {
    /// Time covered by one transfer
    transfer_ms: f64,
    /// Time covered by a full ring
    ring_ms: f64,
    /// How far ahead of the device clock reads are scheduled
    lead_ms: f64,
    /// How long the synchronizer may lag before a slot is refilled under it
    slack_ms: f64,
    /// Warm-up discarded after the first synchronization
    warmup_ms: f64,
    /// Worst-case time for the stall detector to trigger a reset
    stall_detect_ms: f64,
    /// Frameless time before the device is reported unresponsive
    unresponsive_ms: f64,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    if let Some(ref path) = args.config {
        info!(config = %path.display(), "Loading configuration info");
    }
    let config = load_config(args.config.as_deref())?;
    let info = build_stream_info(&config, args.carriers);

    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize stream info")?;
        println!("{}", json);
    } else {
        print_stream_info(&info);
    }

    Ok(())
}

fn build_stream_info(config: &StreamConfig, carriers: bool) -> StreamInfo {
    let poll_ms = config.poll_interval_us as f64 / 1000.0;
    let transfer_ms = config.packets_per_transfer as f64 * FRAME_MS;

    StreamInfo {
        sensor: SensorInfo {
            columns: SENSOR_COLUMNS,
            rows: SENSOR_ROWS,
            endpoints: ENDPOINT_COUNT,
        },
        ring: RingInfo {
            buffer_count: config.buffer_count,
            packets_per_transfer: config.packets_per_transfer,
            positions_per_endpoint: config.ring_positions(),
            lead_window: config.lead_window,
            transfers_in_flight: config.lead_window * ENDPOINT_COUNT,
        },
        timing: TimingInfo {
            transfer_ms,
            ring_ms: config.ring_positions() as f64 * FRAME_MS,
            lead_ms: config.lead_frames() as f64 * FRAME_MS,
            slack_ms: config.buffer_count.saturating_sub(config.lead_window) as f64 * transfer_ms,
            warmup_ms: config.startup_frames as f64 * FRAME_MS,
            stall_detect_ms: (config.stall.check_interval_cycles
                * (config.stall.threshold as u64 + 1)) as f64
                * poll_ms,
            unresponsive_ms: config.unresponsive_cycles as f64 * poll_ms,
        },
        carriers: if carriers {
            config.carrier_frequencies.clone()
        } else {
            Vec::new()
        },
    }
}

fn print_stream_info(info: &StreamInfo) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Taxel Stream Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("🖐  Sensor");
    println!("   ├─ Surface: {} x {} taxels", info.sensor.columns, info.sensor.rows);
    println!("   └─ Endpoints: {}", info.sensor.endpoints);

    let ring = &info.ring;
    println!("\n🔁 Ring (per endpoint)");
    println!(
        "   ├─ Buffers: {} x {} packets",
        ring.buffer_count, ring.packets_per_transfer
    );
    println!("   ├─ Positions: {}", ring.positions_per_endpoint);
    println!("   ├─ Lead window: {} transfers", ring.lead_window);
    println!("   └─ In flight (all endpoints): {}", ring.transfers_in_flight);

    let timing = &info.timing;
    println!("\n⏱  Timing");
    println!("   ├─ Transfer: {:.1} ms", timing.transfer_ms);
    println!("   ├─ Ring: {:.1} ms", timing.ring_ms);
    println!("   ├─ Lead: {:.1} ms", timing.lead_ms);
    println!("   ├─ Synchronizer slack: {:.1} ms", timing.slack_ms);
    println!("   ├─ Warm-up: {:.1} ms", timing.warmup_ms);
    println!("   ├─ Stall detection: ≤ {:.1} ms", timing.stall_detect_ms);
    println!("   └─ Unresponsive after: {:.1} ms", timing.unresponsive_ms);

    if !info.carriers.is_empty() {
        println!("\n📡 Carriers ({})", info.carriers.len());
        for (i, carrier) in info.carriers.iter().enumerate() {
            let prefix = if i == info.carriers.len() - 1 { "└─" } else { "├─" };
            println!("   {} index {}", prefix, carrier);
        }
    }

    println!();
}
