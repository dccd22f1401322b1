//! Link configuration, loadable from and savable to a JSON file.

use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::bluetooth::MIN_RSSI_THRESHOLD;
use crate::utils::ensure_directory_exists;

const DEFAULT_PLATFORM_API: u32 = 33;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Weakest advertisement the scanner forwards, in dBm.
    pub min_rssi: i16,

    /// API level of the platform Bluetooth stack. Legacy levels get a
    /// settle delay between connect and feature discovery.
    pub platform_api: u32,

    /// Feature-group services recognized in addition to the built-in hub
    /// profiles, included in the scan filters.
    pub extra_feature_groups: Vec<Uuid>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            min_rssi: MIN_RSSI_THRESHOLD,
            platform_api: DEFAULT_PLATFORM_API,
            extra_feature_groups: Vec::new(),
        }
    }
}

impl LinkConfig {
    /// Loads the config from `path`, falling back to defaults when the
    /// file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config {:?}", path))?;
        let config: Self =
            serde_json::from_str(&config_json).with_context(|| format!("parsing {:?}", path))?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the config to `path`, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            ensure_directory_exists(dir).await?;
        }
        let config_json = serde_json::to_string_pretty(self)?;
        fs::write(path, config_json)
            .await
            .with_context(|| format!("writing config {:?}", path))?;
        info!("Config saved to {:?}", path);
        Ok(())
    }
}
