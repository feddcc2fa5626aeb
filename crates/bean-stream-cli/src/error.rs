//! Error handling for the bean-stream CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Stream error: {0}")]
    Stream(#[from] bean_stream::StreamError),

    #[error("Device error: {0}")]
    Device(#[from] bean_stream::DeviceError),

    #[error("BLE error: {0}")]
    Ble(#[from] bean_stream_ble::BleBeanError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Hex decoding error: {0}")]
    HexDecoding(#[from] hex::FromHexError),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
