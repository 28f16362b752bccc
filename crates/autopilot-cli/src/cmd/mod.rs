pub mod config;
pub mod manifest;
pub mod state;

use anyhow::Context;
use autopilot_core::config::AutopilotConfig;
use std::path::Path;

/// Load the config file, failing with the path in the message.
pub fn load_config(path: &Path) -> anyhow::Result<AutopilotConfig> {
    AutopilotConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

/// Load the config if it exists; manifest commands work without one.
pub fn load_config_optional(path: &Path) -> anyhow::Result<Option<AutopilotConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    load_config(path).map(Some)
}
