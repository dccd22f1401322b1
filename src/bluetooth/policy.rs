//! Auto-reconnect policy.
//!
//! The scanner consults the policy for every discovery event: a known hub
//! that should reconnect is connected silently instead of being surfaced to
//! listeners. The persistence behind the policy belongs to the application;
//! [`StoredReconnectPolicy`] implements the read/write contract with a flat
//! JSON address list.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::fs;

/// Read-only view the scan pipeline has of the persisted hub table.
pub trait ReconnectPolicy: Send + Sync {
    fn should_auto_reconnect(&self, address: &str) -> bool;
}

/// Policy that never reconnects; discovery events are always surfaced.
pub struct NoAutoReconnect;

impl ReconnectPolicy for NoAutoReconnect {
    fn should_auto_reconnect(&self, _address: &str) -> bool {
        false
    }
}

/// Address list kept by the application, loadable from and savable to disk.
#[derive(Default)]
pub struct StoredReconnectPolicy {
    addresses: Mutex<HashSet<String>>,
}

impl StoredReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the address list from `path`, falling back to an empty policy
    /// when the file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Reconnect list not found at {:?}, starting empty.", path);
            return Ok(Self::new());
        }

        let json = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading reconnect list {:?}", path))?;
        let addresses: HashSet<String> =
            serde_json::from_str(&json).with_context(|| format!("parsing {:?}", path))?;

        info!("Loaded {} auto-reconnect addresses", addresses.len());
        Ok(Self {
            addresses: Mutex::new(addresses),
        })
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            crate::utils::ensure_directory_exists(dir).await?;
        }
        let json = {
            let addresses = self.addresses.lock().unwrap();
            serde_json::to_string_pretty(&*addresses)?
        };
        fs::write(path, json)
            .await
            .with_context(|| format!("writing reconnect list {:?}", path))?;
        Ok(())
    }

    pub fn remember(&self, address: &str) {
        self.addresses.lock().unwrap().insert(address.to_string());
    }

    pub fn forget(&self, address: &str) {
        self.addresses.lock().unwrap().remove(address);
    }
}

impl ReconnectPolicy for StoredReconnectPolicy {
    fn should_auto_reconnect(&self, address: &str) -> bool {
        self.addresses.lock().unwrap().contains(address)
    }
}
