//! Configuration schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment (`WATCHDOGD_`) < CLI.
//!
//! The device settings live at the top level of the file so the snapshot keys
//! (`ip`, `folder_path`, `api_endpoint`, `alfadriver`, `cr`) stay flat; daemon
//! tunables go in a `[watch]` table.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::core::probe::validate_syntax;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "watchdogd.toml";
const ENV_PREFIX: &str = "WATCHDOGD_";

/// Upload strategy selected by the two mutually exclusive flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    AlfaDriver,
    Cr,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlfaDriver => "alfadriver",
            Self::Cr => "cr",
        }
    }
}

/// The device snapshot shared by both loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Dotted-quad address of the device, may be empty
    pub ip: String,
    /// Folder watched for new artifacts, may be empty
    pub folder_path: String,
    /// Path prefix of the control-plane API, e.g. `api/v1`
    pub api_endpoint: String,
    pub api_port: u16,
    #[serde(deserialize_with = "de_flag")]
    pub alfadriver: bool,
    #[serde(deserialize_with = "de_flag")]
    pub cr: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            ip: String::new(),
            folder_path: String::new(),
            api_endpoint: String::new(),
            api_port: 80,
            alfadriver: false,
            cr: false,
        }
    }
}

impl DeviceSettings {
    /// Save-time validation. The mode check comes first because it is the
    /// only one that is also enforced at upload time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alfadriver && self.cr {
            return Err(ConfigError::InvalidConfiguration);
        }

        let ip_empty = self.ip.trim().is_empty();
        let folder_empty = self.folder_path.trim().is_empty();

        match (ip_empty, folder_empty) {
            (true, true) => Err(ConfigError::EmptyArguments),
            (true, false) => Err(ConfigError::MissingIp),
            (false, true) => Err(ConfigError::MissingFolderPath),
            (false, false) if !validate_syntax(self.ip.trim()) => {
                Err(ConfigError::InvalidIp(self.ip.clone()))
            }
            (false, false) => Ok(()),
        }
    }

    /// The active delivery mode, `None` when neither flag is set.
    pub fn delivery_mode(&self) -> Result<Option<DeliveryMode>, ConfigError> {
        match (self.alfadriver, self.cr) {
            (true, true) => Err(ConfigError::InvalidConfiguration),
            (true, false) => Ok(Some(DeliveryMode::AlfaDriver)),
            (false, true) => Ok(Some(DeliveryMode::Cr)),
            (false, false) => Ok(None),
        }
    }

    pub fn upload_url(&self) -> String {
        let prefix = self.api_endpoint.trim_matches('/');
        if prefix.is_empty() {
            format!("http://{}:{}/ad_hoc", self.ip.trim(), self.api_port)
        } else {
            format!("http://{}:{}/{}/ad_hoc", self.ip.trim(), self.api_port, prefix)
        }
    }

    pub fn watched_folder(&self) -> Option<PathBuf> {
        let trimmed = self.folder_path.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

/// Loop timing and pipeline tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub file_interval_ms: u64,
    pub reachability_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    /// Suffix appended to a file name once it has been handled
    pub processed_marker: String,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            file_interval_ms: 4_000,
            reachability_interval_ms: 2_000,
            probe_timeout_ms: 1_000,
            upload_timeout_ms: 3_000,
            shutdown_grace_ms: 5_000,
            processed_marker: "processed".to_string(),
        }
    }
}

impl WatchSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("file_interval_ms", self.file_interval_ms),
            ("reachability_interval_ms", self.reachability_interval_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("upload_timeout_ms", self.upload_timeout_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigError::InvalidWatchSettings(format!(
                    "{name} must be > 0"
                )));
            }
        }

        let marker = self.processed_marker.trim_matches('.');
        if marker.is_empty() || marker.contains(['/', '\\']) {
            return Err(ConfigError::InvalidWatchSettings(
                "processed_marker must be a non-empty file name suffix".to_string(),
            ));
        }

        Ok(())
    }

    pub fn file_interval(&self) -> Duration {
        Duration::from_millis(self.file_interval_ms)
    }

    pub fn reachability_interval(&self) -> Duration {
        Duration::from_millis(self.reachability_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Marker without surrounding dots, as used when building file names.
    pub fn marker(&self) -> &str {
        self.processed_marker.trim_matches('.')
    }
}

/// Fully resolved configuration after all layers merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub device: DeviceSettings,
    pub watch: WatchSettings,
}

impl AppConfig {
    /// Loads config from defaults, file, environment and optional CLI overrides.
    ///
    /// `overrides` is any serializable value whose `None` fields are skipped,
    /// typically the parsed CLI arguments.
    pub fn load<T: Serialize>(path: &Path, overrides: Option<&T>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment.extract()?;
        config.watch.validate()?;

        Ok(config)
    }

    /// Same as [`AppConfig::load`], writing a default file first when none exists.
    pub fn load_or_create<T: Serialize>(
        path: &Path,
        overrides: Option<&T>,
    ) -> Result<Self, ConfigError> {
        if !path.exists() {
            write_default(path)?;
            info!(path = %path.display(), "Created default configuration file");
        }

        Self::load(path, overrides)
    }
}

/// Writes the default snapshot (empty device settings) to `path`.
pub fn write_default(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())?;
    fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Delivery flags are stored loosely by older tooling: bools, 0/1, or strings.
fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Int(value) => Ok(value != 0),
        Flag::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid delivery flag value '{other}'"
            ))),
        },
    }
}
