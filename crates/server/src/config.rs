use std::path::Path;

use anyhow::{Context, Result};
use streambridge_protocol::StreamBridgeConfig;

/// Load configuration from a TOML file at the given path. If the file doesn't exist,
/// returns default configuration.
pub fn load_config(path: &Path) -> Result<StreamBridgeConfig> {
    if !path.exists() {
        tracing::warn!("Config file not found at {}, using defaults", path.display());
        return Ok(StreamBridgeConfig::default());
    }

    let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: StreamBridgeConfig = toml::from_str(&contents).with_context(|| "Failed to parse config TOML")?;

    if let Err(problems) = config.validate() {
        for problem in &problems {
            tracing::warn!("{problem}");
        }
    }

    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}
