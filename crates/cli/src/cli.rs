//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Taxel Stream - two-endpoint isochronous taxel acquisition
#[derive(Parser, Debug)]
#[command(
    name = "taxel-stream",
    author,
    version,
    about = "Isochronous taxel stream acquisition",
    long_about = "Acquires a 64x8 taxel pressure stream delivered over two isochronous \n\
                  endpoints, fuses matching packets into frames and reports stream health.\n\n\
                  Without hardware attached, `run` drives a simulated device with \n\
                  optional fault injection."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TAXEL_STREAM_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TAXEL_STREAM_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream frames from the simulated device
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration-derived stream figures
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); defaults are used when absent
    #[arg(short, long, env = "TAXEL_STREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum number of frames to consume (0 = unlimited)
    #[arg(long, default_value = "0", env = "TAXEL_STREAM_MAX_FRAMES")]
    pub max_frames: u64,

    /// Run timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "TAXEL_STREAM_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without streaming
    #[arg(long)]
    pub dry_run: bool,

    /// Frame channel capacity between the synchronizer and the consumer
    #[arg(long, default_value = "256", env = "TAXEL_STREAM_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "TAXEL_STREAM_METRICS_PORT")]
    pub metrics_port: u16,

    /// Probability that the simulated device drops any single packet
    #[arg(long, default_value = "0.0")]
    pub drop_rate: f64,

    /// Seed for random packet drops
    #[arg(long)]
    pub seed: Option<u64>,

    /// Swap the packets of device frames N and N+1 on endpoint 0
    #[arg(long)]
    pub reorder_at: Vec<u64>,

    /// Freeze the simulated device when its clock reaches this frame
    #[arg(long)]
    pub freeze_at: Option<u64>,

    /// Unplug the simulated device after this many milliseconds
    #[arg(long)]
    pub unplug_after_ms: Option<u64>,

    /// Log every Nth frame at debug level (0 = never)
    #[arg(long, default_value = "1000")]
    pub log_every: u64,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file; defaults are shown when absent
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show carrier frequency indices
    #[arg(long)]
    pub carriers: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_faults() {
        let cli = Cli::try_parse_from([
            "taxel-stream",
            "run",
            "--max-frames",
            "500",
            "--drop-rate",
            "0.01",
            "--reorder-at",
            "120",
            "--reorder-at",
            "240",
            "--freeze-at",
            "400",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.max_frames, 500);
                assert!((args.drop_rate - 0.01).abs() < 1e-12);
                assert_eq!(args.reorder_at, vec![120, 240]);
                assert_eq!(args.freeze_at, Some(400));
                assert!(args.config.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["taxel-stream", "-q", "-v", "info"]);
        assert!(result.is_err());
    }
}
