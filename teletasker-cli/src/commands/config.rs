use std::fs;

use anyhow::{Context, Result};
use shared::config::{Config, ConfigFormat};

/// Generates a configuration file in the specified format.
///
/// # Arguments
/// * `format` - The format of the configuration file ("yaml", "json" or "toml").
///
/// # Errors
/// Returns an error if the format is unsupported or if writing the file fails.
pub fn generate_config(format: &str) -> Result<()> {
    let format = ConfigFormat::from_name(format)?;
    let file_name = format.file_name();
    let serialized = Config::with_defaults().render(format)?;

    fs::write(file_name, serialized)
        .with_context(|| format!("failed to write configuration file {file_name}"))?;

    println!("Configuration file '{file_name}' generated successfully.");
    Ok(())
}
