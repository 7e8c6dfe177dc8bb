//! Run statistics.

use std::time::Duration;

use contracts::StreamStats;
use observability::StreamStatsAggregator;
use transport::MockStats;

/// Statistics from a stream run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Frames the consumer received
    pub frames_received: u64,

    /// Frames whose taxels did not match the simulated pattern
    pub pattern_mismatches: u64,

    /// Listener events dropped because the consumer fell behind
    pub channel_overflows: u64,

    /// Whether the device went away before the run ended
    pub device_closed: bool,

    /// Total duration of the run
    pub duration: Duration,

    /// Driver counters at the end of the run
    pub stream: StreamStats,

    /// Simulated device bookkeeping at the end of the run
    pub device: MockStats,

    /// Consumer-side frame aggregation
    pub metrics: StreamStatsAggregator,
}

impl PipelineStats {
    /// Calculate frames per second throughput
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.frames_received as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Sequence numbers lost between received frames, as a percentage
    pub fn loss_rate(&self) -> f64 {
        let total = self.frames_received + self.metrics.skipped_sequences;
        if total > 0 {
            (self.metrics.skipped_sequences as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Stream Statistics                         ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Frames received: {}", self.frames_received);
        println!("   ├─ FPS: {:.2}", self.fps());
        println!("   ├─ Sequence loss: {:.3}%", self.loss_rate());
        println!("   ├─ Pattern mismatches: {}", self.pattern_mismatches);
        println!("   ├─ Channel overflows: {}", self.channel_overflows);
        println!("   └─ Device closed: {}", self.device_closed);

        let stream = &self.stream;
        println!("\n📈 Acquisition");
        println!("   ├─ Emitted: {}", stream.frames_emitted);
        println!("   ├─ Discarded (warm-up): {}", stream.frames_discarded);
        println!("   ├─ Dropped: {}", stream.frames_dropped);
        println!("   ├─ Sequence gaps: {}", stream.sequence_gaps);
        println!("   ├─ Stall resets: {}", stream.stall_resets);
        println!("   ├─ Reader overruns: {}", stream.reader_overruns);
        println!(
            "   └─ Transfers: submitted={} completed={} underrun={} timing={} unknown={}",
            stream.transfers_submitted,
            stream.transfers_completed,
            stream.underruns,
            stream.timing_errors,
            stream.unknown_errors
        );

        let device = &self.device;
        println!("\n🔌 Simulated device");
        println!(
            "   ├─ Buffers: allocated={} released={} released_in_flight={}",
            device.allocated, device.released, device.released_in_flight
        );
        println!(
            "   ├─ Reads: submitted={} completed={} aborted={}",
            device.submitted, device.completed, device.aborted
        );
        println!(
            "   └─ Faults: dropped_packets={} stale={} too_old={} too_new={}",
            device.dropped_packets, device.stale_completions, device.too_old, device.too_new
        );

        let summary = self.metrics.summary(None);
        println!("\n🧮 Frames");
        println!("   ├─ Interval (ms): {}", summary.frame_interval_ms);
        println!("   ├─ Peak: {}", summary.peak);
        println!("   └─ Total pressure: {}", summary.total_pressure);

        if !summary.error_counts.is_empty() {
            println!("\n⚠️  Stream errors");
            let mut codes: Vec<_> = summary.error_counts.iter().collect();
            codes.sort_by_key(|(code, _)| code.code());
            for (code, count) in codes {
                println!("   ├─ {}: {}", code, count);
            }
        }

        println!();
    }
}
