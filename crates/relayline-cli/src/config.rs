//! Configuration loading for the `relayline` binary.

use anyhow::Context;
use relayline_types::config::RelaylineConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Read and validate a config file. Returns `Ok(None)` when the file does not exist.
pub fn read_config(path: &Path) -> anyhow::Result<Option<RelaylineConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: RelaylineConfig =
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    config.engine.validate()?;
    Ok(Some(config))
}

/// Settle the outcome of [`read_config`], falling back to defaults with a warning.
pub fn resolve_config(
    loaded: anyhow::Result<Option<RelaylineConfig>>,
    path: &Path,
) -> RelaylineConfig {
    match loaded {
        Ok(Some(config)) => {
            info!(path = %path.display(), "Loaded configuration");
            config
        }
        Ok(None) => {
            debug!(path = %path.display(), "Config file not found, using defaults");
            RelaylineConfig::default()
        }
        Err(e) => {
            warn!(
                error = %format!("{e:#}"),
                path = %path.display(),
                "Failed to load config, using defaults"
            );
            RelaylineConfig::default()
        }
    }
}

/// Default config path: `~/.relayline/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".relayline")
        .join("config.toml")
}
