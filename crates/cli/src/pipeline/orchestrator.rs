//! Stream orchestrator - wires the simulated device, the driver and the consumer.
//!
//! The driver runs on its own threads; this side only consumes listener events
//! and decides when to stop.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use acquisition::StreamDriver;
use anyhow::{Context, Result};
use contracts::{StreamConfig, UsbTransport};
use observability::{record_frame, record_frame_interval_ms, record_stream_error, record_stream_stats};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use transport::{pattern, MockTransport, MockTransportConfig};

use super::{ChannelListener, PipelineStats, StreamEvent};

const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Faults injected into the simulated device
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Per-packet drop probability
    pub drop_rate: f64,

    /// Seed for random drops
    pub seed: Option<u64>,

    /// Device frames whose endpoint-0 packet is swapped with the next one
    pub reorder_at: Vec<u64>,

    /// Device frame at which every endpoint freezes
    pub freeze_at: Option<u64>,

    /// Unplug the device after this long
    pub unplug_after: Option<Duration>,
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Acquisition configuration
    pub stream: StreamConfig,

    /// Maximum number of frames to consume (None = unlimited)
    pub max_frames: Option<u64>,

    /// Run timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Frame channel capacity
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Simulated device faults
    pub faults: FaultPlan,

    /// Log every Nth frame (0 = never)
    pub log_every: u64,
}

/// Why the consume loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    MaxFrames,
    Timeout,
    Signal,
    DeviceClosed,
    Unplugged,
}

/// Main stream orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until a stop condition or `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let start_time = Instant::now();

        // Initialize Metrics (optional)
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let device = Arc::new(self.build_device());
        let mut bus = device
            .spawn_bus()
            .context("Failed to start simulated bus thread")?;
        info!(
            drop_rate = self.config.faults.drop_rate,
            reorders = self.config.faults.reorder_at.len(),
            freeze_at = ?self.config.faults.freeze_at,
            "Simulated device attached"
        );

        let (tx, mut rx) = mpsc::channel::<StreamEvent>(self.config.buffer_size.max(1));
        let listener = Arc::new(ChannelListener::new(tx));

        let transport: Arc<dyn UsbTransport> = device.clone();
        let driver = Arc::new(
            StreamDriver::start(transport, self.config.stream.clone(), listener.clone())
                .context("Failed to start acquisition")?,
        );
        info!(state = ?driver.state(), "Acquisition started");

        let mut stats = PipelineStats::default();
        let mut last_arrival: Option<Instant> = None;

        let timeout = sleep_or_pending(self.config.timeout);
        let unplug = sleep_or_pending(self.config.faults.unplug_after);
        tokio::pin!(shutdown, timeout, unplug);
        let mut stats_tick = tokio::time::interval(STATS_INTERVAL);

        let reason = loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        break StopReason::DeviceClosed;
                    };
                    match event {
                        StreamEvent::Startup => info!("Stream synchronized"),
                        StreamEvent::Frame(frame) => {
                            let now = Instant::now();
                            let interval = last_arrival
                                .map(|t| now.duration_since(t).as_secs_f64() * 1000.0);
                            last_arrival = Some(now);

                            stats.frames_received += 1;
                            if !pattern::frame_matches(&frame) {
                                stats.pattern_mismatches += 1;
                                warn!(sequence = %frame.sequence, "Frame does not match device pattern");
                            }
                            stats.metrics.update(&frame, interval);
                            record_frame(&frame);
                            if let Some(ms) = interval {
                                record_frame_interval_ms(ms);
                            }

                            if self.config.log_every > 0
                                && stats.frames_received % self.config.log_every == 0
                            {
                                debug!(
                                    sequence = %frame.sequence,
                                    peak = format!("{:.3}", frame.peak()),
                                    total = format!("{:.1}", frame.total_pressure()),
                                    "Frame received"
                                );
                            }

                            if let Some(max) = self.config.max_frames {
                                if stats.frames_received >= max {
                                    info!(frames = stats.frames_received, "Reached max frames limit");
                                    break StopReason::MaxFrames;
                                }
                            }
                        }
                        StreamEvent::Error { code, message } => {
                            warn!(code = %code, message = %message, "Stream error");
                            stats.metrics.record_error(code);
                            record_stream_error(code);
                        }
                        StreamEvent::Closed => break StopReason::DeviceClosed,
                    }
                }
                _ = stats_tick.tick() => {
                    record_stream_stats(&driver.stats());
                }
                _ = &mut unplug => {
                    warn!("Unplugging simulated device");
                    device.unplug();
                    let removing = Arc::clone(&driver);
                    let removed = tokio::task::spawn_blocking(move || removing.device_removed())
                        .await
                        .context("Removal task failed")?;
                    if let Err(e) = removed {
                        warn!(error = %e, "Device removal reported an error");
                    }
                    break StopReason::Unplugged;
                }
                _ = &mut timeout => {
                    warn!("Run timed out");
                    break StopReason::Timeout;
                }
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping stream...");
                    break StopReason::Signal;
                }
            }
        };

        // Shutdown
        info!(reason = ?reason, "Stopping stream...");
        if driver.state().permits_transfers() {
            let stopping = Arc::clone(&driver);
            let stopped = tokio::task::spawn_blocking(move || stopping.shutdown())
                .await
                .context("Shutdown task failed")?;
            if let Err(e) = stopped {
                warn!(error = %e, "Shutdown reported an error");
            }
        }
        bus.stop();

        stats.device_closed = matches!(reason, StopReason::DeviceClosed | StopReason::Unplugged);
        stats.channel_overflows = listener.overflowed();
        stats.stream = driver.stats();
        stats.device = device.stats();
        stats.duration = start_time.elapsed();
        record_stream_stats(&stats.stream);

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.fps()),
            "Stream shutdown complete"
        );

        Ok(stats)
    }

    fn build_device(&self) -> MockTransport {
        let faults = &self.config.faults;
        let device = MockTransport::new(MockTransportConfig {
            drop_probability: faults.drop_rate,
            seed: faults.seed,
            freeze_at: faults.freeze_at,
            ..MockTransportConfig::default()
        });
        for &frame in &faults.reorder_at {
            device.reorder(0, frame);
        }
        device
    }
}

/// Sleep for `duration`, or never resolve when absent
async fn sleep_or_pending(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> PipelineConfig {
        PipelineConfig {
            stream: StreamConfig {
                startup_frames: 5,
                elevated_priority: false,
                ..StreamConfig::default()
            },
            max_frames: None,
            timeout: Some(Duration::from_secs(10)),
            buffer_size: 1024,
            metrics_port: None,
            faults: FaultPlan::default(),
            log_every: 0,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runs_to_max_frames() {
        let config = PipelineConfig {
            max_frames: Some(50),
            ..quick_config()
        };

        let stats = Pipeline::new(config)
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.frames_received, 50);
        assert_eq!(stats.pattern_mismatches, 0);
        assert!(!stats.device_closed);
        assert_eq!(stats.device.released, stats.device.allocated);
        assert_eq!(stats.device.released_in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unplug_ends_run() {
        let config = PipelineConfig {
            faults: FaultPlan {
                unplug_after: Some(Duration::from_millis(300)),
                ..FaultPlan::default()
            },
            ..quick_config()
        };

        let stats = Pipeline::new(config)
            .run(std::future::pending())
            .await
            .unwrap();

        assert!(stats.device_closed);
        assert_eq!(stats.device.released_in_flight, 0);
        assert_eq!(stats.stream.state, contracts::DeviceState::NoDevice);
    }
}
