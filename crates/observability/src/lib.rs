//! # Observability
//!
//! 采集链路的日志与指标。
//!
//! - Tracing 订阅器（JSON / Pretty / Compact），线程名默认开启，
//!   便于区分同步线程、总线线程与 tokio 工作线程
//! - Prometheus 导出（可选）
//! - StreamStats 快照与帧统计
//!
//! ```ignore
//! observability::init_with_config(ObservabilityConfig {
//!     metrics_port: Some(9464),
//!     ..Default::default()
//! })?;
//!
//! // 周期性记录驱动快照
//! observability::record_stream_stats(&driver.stats());
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

pub use crate::metrics::{
    record_frame, record_frame_interval_ms, record_stream_error, record_stream_stats,
    MetricsSummary, RunningStats, StatsSummary, StreamStatsAggregator,
};

/// 默认过滤：同步核心 info，模拟总线只报警告
pub const DEFAULT_FILTER: &str = "info,transport=warn";

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// 日志格式
    pub log_format: LogFormat,
    /// Prometheus 端口 (None = 禁用)
    pub metrics_port: Option<u16>,
    /// RUST_LOG 未设置时使用的过滤表达式
    pub default_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Compact,
            metrics_port: None,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    #[default]
    Compact,
}

/// 默认配置初始化（Compact 日志，无指标导出）
pub fn init() -> Result<()> {
    init_with_config(ObservabilityConfig::default())
}

/// 使用自定义配置初始化
///
/// 全局订阅器只能安装一次，重复调用返回错误。
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))
        .with_context(|| format!("Invalid log filter '{}'", config.default_filter))?;

    tracing_subscriber::registry()
        .with(format_layer(config.log_format).with_filter(filter))
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        install_prometheus(port)?;
    }

    tracing::info!(
        log_format = ?config.log_format,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );
    Ok(())
}

/// 仅初始化 Prometheus 指标（Tracing 已由调用方安装）
pub fn init_metrics_only(port: u16) -> Result<()> {
    install_prometheus(port)
}

fn format_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_thread_names(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_thread_names(true).boxed(),
    }
}

fn install_prometheus(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .with_context(|| format!("Failed to install Prometheus recorder on port {port}"))?;

    tracing::info!(port, "Prometheus metrics endpoint initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_format, LogFormat::Compact);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.default_filter, DEFAULT_FILTER);
    }

    #[test]
    fn test_subscriber_installs_once() {
        // 本测试进程内唯一安装全局订阅器的地方
        let config = ObservabilityConfig {
            log_format: LogFormat::Json,
            ..Default::default()
        };
        assert!(init_with_config(config.clone()).is_ok());
        assert!(init_with_config(config).is_err());
    }
}
