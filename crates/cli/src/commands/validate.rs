//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::StreamConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    buffer_count: usize,
    packets_per_transfer: usize,
    lead_window: usize,
    ring_positions: usize,
    carrier_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    // Check file exists
    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    // Try to load and validate
    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    buffer_count: config.buffer_count,
                    packets_per_transfer: config.packets_per_transfer,
                    lead_window: config.lead_window,
                    ring_positions: config.ring_positions(),
                    carrier_count: config.carrier_frequencies.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &StreamConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    // Slack the synchronizer has before a slot is refilled under it
    if config.buffer_count.saturating_sub(config.lead_window) < 2 {
        warnings.push(format!(
            "buffer_count ({}) leaves less than two transfers of slack over lead_window ({})",
            config.buffer_count, config.lead_window
        ));
    }

    // Poll slower than one transfer completes
    let transfer_us = config.packets_per_transfer as u64 * 1000;
    if config.poll_interval_us > transfer_us {
        warnings.push(format!(
            "poll_interval_us ({}) exceeds one transfer ({}us); frames arrive in bursts",
            config.poll_interval_us, transfer_us
        ));
    }

    if config.startup_frames == 0 {
        warnings.push("startup_frames is 0 - settling frames will be delivered".to_string());
    }

    if !config.elevated_priority {
        warnings.push("elevated_priority is off - synchronizer may be starved under load".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Buffers: {}", summary.buffer_count);
            println!("  Packets per transfer: {}", summary.packets_per_transfer);
            println!("  Lead window: {}", summary.lead_window);
            println!("  Ring positions: {}", summary.ring_positions);
            println!("  Carriers: {}", summary.carrier_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
