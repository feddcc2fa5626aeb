//! Error types for the Bean reading stream
//!
//! Per-reading failures ([`DecodeError`], transient [`DeviceError`]s) never end
//! the stream; they are published as [`crate::StreamEvent`]s. [`StreamError`] is
//! reserved for failures that are fatal to configuring or starting a stream.

use thiserror::Error;

use crate::lifecycle::StreamState;
use crate::reading::ReadingKind;

// ----------------------------------------------------------------------------
// Device Errors
// ----------------------------------------------------------------------------

/// Errors reported by a [`crate::BeanDevice`] implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device not connected")]
    NotConnected,

    #[error("Characteristic {characteristic} is not supported by this device")]
    Unsupported { characteristic: String },

    #[error("Failed to read {characteristic}: {reason}")]
    ReadFailed {
        characteristic: String,
        reason: String,
    },

    #[error("Failed to write {characteristic}: {reason}")]
    WriteFailed {
        characteristic: String,
        reason: String,
    },

    #[error("Failed to subscribe to {characteristic}: {reason}")]
    SubscriptionFailed {
        characteristic: String,
        reason: String,
    },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Device error: {0}")]
    Other(String),
}

// ----------------------------------------------------------------------------
// Decode Errors
// ----------------------------------------------------------------------------

/// Raw value could not be turned into a reading of the expected kind
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{kind}: expected {expected} bytes, got {actual}")]
    Length {
        kind: ReadingKind,
        expected: String,
        actual: usize,
    },

    #[error("{kind}: value {value} out of range")]
    OutOfRange { kind: ReadingKind, value: i64 },

    #[error("{kind} readings are not produced from raw device values")]
    NotDecodable { kind: ReadingKind },
}

// ----------------------------------------------------------------------------
// Stream Errors
// ----------------------------------------------------------------------------

/// Errors that are fatal to configuring or starting a stream
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Invalid stream configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Operation `{operation}` not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: StreamState,
    },

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

impl StreamError {
    /// Convenience constructor for configuration errors
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        StreamError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;
