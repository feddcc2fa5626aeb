//! CLI configuration
//!
//! Loaded from an optional TOML file; command-line flags are overlaid by the
//! subcommands. Example:
//!
//! ```toml
//! device = "C4:BE:84:12:34:56"
//!
//! [ble]
//! scan_timeout_secs = 15
//!
//! [ble.characteristics]
//! temperature = "a495ff31-c5b1-4b44-b512-1370f02d74de"
//!
//! [stream]
//! poll = 2000
//! pollBatt = true
//! notifyScratch = "1,2"
//! ```

use std::path::Path;
use std::time::Duration;

use bean_stream::StreamOptions;
use bean_stream_ble::{BleBeanConfig, CharacteristicMap};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address or local name of the Bean to open
    pub device: Option<String>,
    /// BLE facade settings
    pub ble: BleSettings,
    /// Stream options applied before command-line flags
    pub stream: StreamOptions,
}

/// BLE settings in file-friendly units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleSettings {
    pub scan_timeout_secs: u64,
    pub connection_timeout_secs: u64,
    pub filter_services: bool,
    pub characteristics: CharacteristicMap,
}

impl Default for BleSettings {
    fn default() -> Self {
        let defaults = BleBeanConfig::default();
        Self {
            scan_timeout_secs: defaults.scan_timeout.as_secs(),
            connection_timeout_secs: defaults.connection_timeout.as_secs(),
            filter_services: defaults.filter_services,
            characteristics: defaults.characteristics,
        }
    }
}

impl BleSettings {
    pub fn to_ble_config(&self) -> BleBeanConfig {
        BleBeanConfig::new()
            .with_scan_timeout(Duration::from_secs(self.scan_timeout_secs))
            .with_connection_timeout(Duration::from_secs(self.connection_timeout_secs))
            .with_service_filter(self.filter_services)
            .with_characteristics(self.characteristics.clone())
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = toml::from_str(&contents)?;
        debug!("Loaded configuration from {}", path.as_ref().display());
        config.validate()?;
        Ok(config)
    }

    /// Override the device from the command line
    pub fn with_device(mut self, device: Option<String>) -> Self {
        if device.is_some() {
            self.device = device;
        }
        self
    }

    /// Device to open; required by every subcommand
    pub fn device(&self) -> Result<&str> {
        self.device.as_deref().ok_or_else(|| {
            CliError::Config("no Bean selected; pass --device or set `device` in the config file".into())
        })
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if let Some(device) = &self.device {
            if device.trim().is_empty() {
                return Err(CliError::Config("device must not be empty".into()));
            }
        }
        if self.ble.scan_timeout_secs == 0 {
            return Err(CliError::Config("ble.scan_timeout_secs must be > 0".into()));
        }
        if self.ble.connection_timeout_secs == 0 {
            return Err(CliError::Config(
                "ble.connection_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}
