//! Error types for the BLE facade

use bean_stream::DeviceError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the BLE facade
#[derive(Error, Debug)]
pub enum BleBeanError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Bean {target} not found within {seconds}s scan")]
    NotFound { target: String, seconds: u64 },

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Bean not connected")]
    NotConnected,

    #[error("No characteristic configured for {kind}")]
    Unmapped { kind: String },

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("Failed to get notifications stream: {0}")]
    NotificationStreamFailed(String),

    #[error("BLE error: {0}")]
    Btleplug(#[from] btleplug::Error),
}

impl From<BleBeanError> for DeviceError {
    fn from(err: BleBeanError) -> Self {
        match err {
            BleBeanError::NotConnected => DeviceError::NotConnected,
            BleBeanError::Unmapped { kind } => DeviceError::Unsupported {
                characteristic: kind,
            },
            BleBeanError::CharacteristicNotFound { characteristic } => {
                DeviceError::Unsupported { characteristic }
            }
            BleBeanError::ConnectionTimeout | BleBeanError::AdapterNotAvailable => {
                DeviceError::ConnectionFailed(err.to_string())
            }
            BleBeanError::NotFound { .. } => DeviceError::ConnectionFailed(err.to_string()),
            BleBeanError::NotificationStreamFailed(reason) => DeviceError::SubscriptionFailed {
                characteristic: "notifications".to_string(),
                reason,
            },
            BleBeanError::Btleplug(btleplug::Error::NotConnected) => DeviceError::NotConnected,
            BleBeanError::Btleplug(error) => DeviceError::Other(error.to_string()),
        }
    }
}

/// Result type for BLE facade operations
pub type Result<T> = std::result::Result<T, BleBeanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_mapping() {
        assert_eq!(
            DeviceError::from(BleBeanError::NotConnected),
            DeviceError::NotConnected
        );
        assert_eq!(
            DeviceError::from(BleBeanError::Unmapped {
                kind: "temp".to_string()
            }),
            DeviceError::Unsupported {
                characteristic: "temp".to_string()
            }
        );
        assert!(matches!(
            DeviceError::from(BleBeanError::ConnectionTimeout),
            DeviceError::ConnectionFailed(_)
        ));
    }
}
