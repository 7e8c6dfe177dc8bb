//! Command implementations.

mod info;
mod run;
mod validate;

pub use info::run_info;
pub use run::run_stream;
pub use validate::run_validate;

use std::path::Path;

use anyhow::{Context, Result};
use contracts::StreamConfig;
use tracing::info;

use crate::error::CliError;

/// Load the configuration at `path`, or the defaults when no path is given
fn load_config(path: Option<&Path>) -> Result<StreamConfig> {
    match path {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()).into());
            }
            config_loader::ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => {
            info!("No configuration file given, using defaults");
            Ok(StreamConfig::default())
        }
    }
}
