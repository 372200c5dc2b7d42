//! Live configuration shared by the supervised loops.
//!
//! Readers get an `Arc` to an immutable snapshot; writers swap the whole
//! snapshot, so a loop never observes a mix of old and new fields.

use std::sync::Arc;
use tokio::sync::RwLock;

use super::probe::ConnectivityState;
use crate::config::DeviceSettings;
use crate::error::ConfigError;

#[derive(Clone, Default)]
pub struct ConfigStore {
    settings: Arc<RwLock<Arc<DeviceSettings>>>,
    connectivity: Arc<RwLock<Probed>>,
}

/// A probe result and the address it was taken for.
#[derive(Debug, Clone, Default)]
struct Probed {
    address: String,
    state: ConnectivityState,
}

impl ConfigStore {
    /// The initial snapshot is taken as-is; an empty default is a valid
    /// starting point for a freshly created config file.
    pub fn new(initial: DeviceSettings) -> Self {
        Self {
            settings: Arc::new(RwLock::new(Arc::new(initial))),
            connectivity: Arc::new(RwLock::new(Probed::default())),
        }
    }

    pub async fn get(&self) -> Arc<DeviceSettings> {
        self.settings.read().await.clone()
    }

    /// Validate and replace the snapshot. On error the previous snapshot stays.
    pub async fn set(&self, new: DeviceSettings) -> Result<(), ConfigError> {
        new.validate()?;
        *self.settings.write().await = Arc::new(new);
        Ok(())
    }

    /// Last probe result for `address`. A result taken for any other
    /// address, e.g. before the device IP was changed, reads as not ready.
    pub async fn connectivity_for(&self, address: &str) -> ConnectivityState {
        let probed = self.connectivity.read().await;
        if probed.address == address.trim() {
            probed.state
        } else {
            ConnectivityState::default()
        }
    }

    pub async fn set_connectivity(&self, address: &str, state: ConnectivityState) {
        *self.connectivity.write().await = Probed {
            address: address.trim().to_string(),
            state,
        };
    }
}
