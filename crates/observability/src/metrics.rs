//! 采集流指标模块
//!
//! 基于 `StreamStats` 快照和输出帧收集、统计采集核心的运行指标。

use std::collections::HashMap;

use contracts::{ErrorCode, SensorFrame, Seq, StreamStats};
use metrics::{counter, gauge, histogram};

/// 从 StreamStats 快照记录指标
///
/// 计数器使用绝对值，可以按任意频率调用。
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_stream_stats;
///
/// record_stream_stats(&driver.stats());
/// ```
pub fn record_stream_stats(stats: &StreamStats) {
    // 帧计数
    counter!("taxel_stream_frames_emitted").absolute(stats.frames_emitted);
    counter!("taxel_stream_frames_discarded").absolute(stats.frames_discarded);
    counter!("taxel_stream_frames_dropped").absolute(stats.frames_dropped);

    // 同步事件
    counter!("taxel_stream_sequence_gaps").absolute(stats.sequence_gaps);
    counter!("taxel_stream_stall_resets").absolute(stats.stall_resets);
    counter!("taxel_stream_reader_overruns").absolute(stats.reader_overruns);

    // 传输
    counter!("taxel_stream_transfers_submitted").absolute(stats.transfers_submitted);
    counter!("taxel_stream_transfers_completed").absolute(stats.transfers_completed);
    counter!("taxel_stream_transfer_errors", "kind" => "underrun").absolute(stats.underruns);
    counter!("taxel_stream_transfer_errors", "kind" => "timing").absolute(stats.timing_errors);
    counter!("taxel_stream_transfer_errors", "kind" => "unknown").absolute(stats.unknown_errors);
    counter!("taxel_stream_transfer_errors", "kind" => "submit").absolute(stats.submit_failures);

    gauge!("taxel_stream_in_flight").set(stats.in_flight as f64);
    gauge!("taxel_stream_device_state").set(stats.state as u8 as f64);
}

/// 记录一帧输出
pub fn record_frame(frame: &SensorFrame) {
    gauge!("taxel_stream_last_sequence").set(frame.sequence.0 as f64);
    histogram!("taxel_stream_frame_peak").record(frame.peak() as f64);
    histogram!("taxel_stream_frame_total_pressure").record(frame.total_pressure() as f64);
}

/// 记录帧到达间隔
pub fn record_frame_interval_ms(interval_ms: f64) {
    histogram!("taxel_stream_frame_interval_ms").record(interval_ms);
}

/// 记录监听器收到的错误通知
pub fn record_stream_error(code: ErrorCode) {
    counter!("taxel_stream_errors_total", "code" => code.to_string()).increment(1);
}

/// 采集流指标聚合器
///
/// 在内存中聚合消费端看到的帧，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct StreamStatsAggregator {
    /// 收到的帧数
    pub total_frames: u64,

    /// 相邻帧之间跳过的序号总数
    pub skipped_sequences: u64,

    /// 序号未递增的帧数 (重复或倒退)
    pub non_monotonic: u64,

    /// 最后一帧序号
    pub last_sequence: Option<Seq>,

    /// 帧间隔统计 (毫秒)
    pub interval_stats: RunningStats,

    /// 单帧峰值统计
    pub peak_stats: RunningStats,

    /// 单帧总压力统计
    pub pressure_stats: RunningStats,

    /// 各错误码次数
    pub error_counts: HashMap<ErrorCode, u64>,
}

impl StreamStatsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新帧统计
    ///
    /// `interval_ms` 为距上一帧的到达间隔，第一帧传 `None`。
    pub fn update(&mut self, frame: &SensorFrame, interval_ms: Option<f64>) {
        self.total_frames += 1;

        if let Some(last) = self.last_sequence {
            if frame.sequence.is_newer_than(last) {
                self.skipped_sequences += (last.distance_to(frame.sequence) - 1) as u64;
            } else {
                self.non_monotonic += 1;
            }
        }
        self.last_sequence = Some(frame.sequence);

        if let Some(interval) = interval_ms {
            self.interval_stats.push(interval);
        }
        self.peak_stats.push(frame.peak() as f64);
        self.pressure_stats.push(frame.total_pressure() as f64);
    }

    /// 记录错误通知
    pub fn record_error(&mut self, code: ErrorCode) {
        *self.error_counts.entry(code).or_insert(0) += 1;
    }

    /// 生成摘要报告
    ///
    /// `stats` 为驱动侧最终快照 (可选)。
    pub fn summary(&self, stats: Option<&StreamStats>) -> MetricsSummary {
        let consumed = self.total_frames + self.skipped_sequences;
        MetricsSummary {
            total_frames: self.total_frames,
            skipped_sequences: self.skipped_sequences,
            non_monotonic: self.non_monotonic,
            skip_rate: if consumed > 0 {
                self.skipped_sequences as f64 / consumed as f64 * 100.0
            } else {
                0.0
            },
            frame_interval_ms: StatsSummary::from(&self.interval_stats),
            peak: StatsSummary::from(&self.peak_stats),
            total_pressure: StatsSummary::from(&self.pressure_stats),
            error_counts: self.error_counts.clone(),
            driver: stats.cloned(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub skipped_sequences: u64,
    pub non_monotonic: u64,
    pub skip_rate: f64,
    pub frame_interval_ms: StatsSummary,
    pub peak: StatsSummary,
    pub total_pressure: StatsSummary,
    pub error_counts: HashMap<ErrorCode, u64>,
    pub driver: Option<StreamStats>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Stream Metrics Summary ===")?;
        writeln!(f, "Total frames: {}", self.total_frames)?;
        writeln!(
            f,
            "Skipped sequences: {} ({:.2}%)",
            self.skipped_sequences, self.skip_rate
        )?;
        writeln!(f, "Non-monotonic frames: {}", self.non_monotonic)?;
        writeln!(f, "Frame interval (ms): {}", self.frame_interval_ms)?;
        writeln!(f, "Peak intensity: {}", self.peak)?;
        writeln!(f, "Total pressure: {}", self.total_pressure)?;

        if !self.error_counts.is_empty() {
            writeln!(f, "Errors:")?;
            let mut codes: Vec<_> = self.error_counts.iter().collect();
            codes.sort_by_key(|(code, _)| code.code());
            for (code, count) in codes {
                writeln!(f, "  {}: {}", code, count)?;
            }
        }

        if let Some(stats) = &self.driver {
            writeln!(f, "Driver:")?;
            writeln!(
                f,
                "  emitted={} discarded={} dropped={}",
                stats.frames_emitted, stats.frames_discarded, stats.frames_dropped
            )?;
            writeln!(
                f,
                "  gaps={} stall_resets={} overruns={}",
                stats.sequence_gaps, stats.stall_resets, stats.reader_overruns
            )?;
            writeln!(
                f,
                "  transfers submitted={} completed={} underruns={} timing={} unknown={}",
                stats.transfers_submitted,
                stats.transfers_completed,
                stats.underruns,
                stats.timing_errors,
                stats.unknown_errors
            )?;
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }
}
