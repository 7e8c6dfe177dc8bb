//! # Taxel Stream CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载与验证
//! - 模拟设备上的采集运行
//! - 优雅关闭处理

mod cli;
mod commands;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_stream, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging based on CLI options
    init_logging(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Taxel stream CLI starting"
    );

    // Execute command
    let result = match &cli.command {
        Commands::Run(args) => run_stream(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Map `-v` / `-q` / `--log-format` onto the shared subscriber setup
///
/// `RUST_LOG` still wins over the verbosity flags.
fn init_logging(cli: &Cli) -> Result<()> {
    let default_filter = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => observability::DEFAULT_FILTER,
            1 => "debug,transport=info",
            _ => "trace",
        }
    };

    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        // the run command installs the exporter itself once it knows the port
        metrics_port: None,
        default_filter: default_filter.to_string(),
    })
}
