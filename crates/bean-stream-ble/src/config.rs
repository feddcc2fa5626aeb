//! BLE facade configuration

use std::time::Duration;

use bean_stream::ReadingKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{
    BATTERY_LEVEL_CHARACTERISTIC_UUID, BEAN_SCRATCH_CHARACTERISTIC_UUIDS,
    BEAN_SERIAL_CHARACTERISTIC_UUID,
};

// ----------------------------------------------------------------------------
// Characteristic Map
// ----------------------------------------------------------------------------

/// Which GATT characteristic backs each reading kind
///
/// Stock Bean firmware only exposes accelerometer and temperature through the
/// framed serial protocol, so those have no characteristic unless a custom
/// sketch or firmware provides one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacteristicMap {
    pub battery: Option<Uuid>,
    pub temperature: Option<Uuid>,
    pub accelerometer: Option<Uuid>,
    pub serial: Option<Uuid>,
    /// Scratch banks 1 through 5, in order
    pub scratch: Vec<Uuid>,
}

impl Default for CharacteristicMap {
    fn default() -> Self {
        Self {
            battery: Some(BATTERY_LEVEL_CHARACTERISTIC_UUID),
            temperature: None,
            accelerometer: None,
            serial: Some(BEAN_SERIAL_CHARACTERISTIC_UUID),
            scratch: BEAN_SCRATCH_CHARACTERISTIC_UUIDS.to_vec(),
        }
    }
}

impl CharacteristicMap {
    /// Characteristic for a reading kind, if the device exposes one
    pub fn uuid_for(&self, kind: ReadingKind) -> Option<Uuid> {
        match kind {
            ReadingKind::Battery => self.battery,
            ReadingKind::Temperature => self.temperature,
            ReadingKind::Accelerometer => self.accelerometer,
            ReadingKind::Serial => self.serial,
            ReadingKind::Scratch(index) => usize::from(index)
                .checked_sub(1)
                .and_then(|slot| self.scratch.get(slot))
                .copied(),
            ReadingKind::Merged => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for opening a Bean over BLE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleBeanConfig {
    /// Maximum time to scan for the target peripheral
    pub scan_timeout: Duration,
    /// Maximum time to wait for connection
    pub connection_timeout: Duration,
    /// Restrict the scan to peripherals advertising the Bean service
    pub filter_services: bool,
    pub characteristics: CharacteristicMap,
}

impl Default for BleBeanConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(5),
            filter_services: true,
            characteristics: CharacteristicMap::default(),
        }
    }
}

impl BleBeanConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set scan timeout
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Enable or disable the service filter while scanning
    pub fn with_service_filter(mut self, enabled: bool) -> Self {
        self.filter_services = enabled;
        self
    }

    /// Replace the characteristic map
    pub fn with_characteristics(mut self, characteristics: CharacteristicMap) -> Self {
        self.characteristics = characteristics;
        self
    }
}
