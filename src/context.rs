use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{AppConfig, WatchSettings};
use crate::core::{
    ConfigStore, DeviceClient, HttpDeviceClient, PingProber, Prober, StatusMessage, StatusSink,
};
use crate::error::ConfigError;

/// Everything a supervised loop needs, cheap to clone into each task.
#[derive(Clone)]
pub struct AppContext {
    pub watch: Arc<WatchSettings>,
    pub store: ConfigStore,
    pub sink: Arc<dyn StatusSink>,
    pub prober: Arc<dyn Prober>,
    pub client: Arc<dyn DeviceClient>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        sink: Arc<dyn StatusSink>,
        prober: Arc<dyn Prober>,
        client: Arc<dyn DeviceClient>,
    ) -> Self {
        Self {
            store: ConfigStore::new(config.device),
            watch: Arc::new(config.watch),
            sink,
            prober,
            client,
        }
    }

    /// Production wiring: system ping and a reqwest client.
    pub fn with_defaults(
        config: AppConfig,
        sink: Arc<dyn StatusSink>,
    ) -> Result<Self, reqwest::Error> {
        let client = HttpDeviceClient::new(config.watch.upload_timeout())?;
        Ok(Self::new(config, sink, Arc::new(PingProber), Arc::new(client)))
    }

    /// Re-read the config file and swap in its device settings.
    ///
    /// Failures are reported to the sink and leave the running snapshot in
    /// place. Watch settings are fixed for the life of the loops.
    pub async fn reload<T: Serialize>(
        &self,
        path: &Path,
        overrides: Option<&T>,
    ) -> Result<(), ConfigError> {
        let result = self.try_reload(path, overrides).await;

        match &result {
            Ok(()) => {
                info!(path = %path.display(), "Configuration reloaded");
                self.sink
                    .append_message(StatusMessage::info("Configuration reloaded"));
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Configuration reload rejected");
                self.sink.append_message(StatusMessage::error(format!(
                    "Configuration not saved: {e}"
                )));
            }
        }

        result
    }

    async fn try_reload<T: Serialize>(
        &self,
        path: &Path,
        overrides: Option<&T>,
    ) -> Result<(), ConfigError> {
        let loaded = AppConfig::load(path, overrides)?;
        if loaded.watch != *self.watch {
            warn!("Watch settings changed on disk, restart to apply them");
        }
        self.store.set(loaded.device).await
    }
}
