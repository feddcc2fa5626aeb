//! Bluetooth Low Energy facade for bean-stream
//!
//! This crate provides [`BleBean`], an implementation of the
//! [`bean_stream::BeanDevice`] facade over a btleplug peripheral.
//!
//! ## Architecture
//!
//! - [`config`] - Scan / connection timeouts and the characteristic map
//! - [`error`] - Error types specific to the BLE facade
//! - [`protocol`] - Bean GATT service and characteristic UUIDs
//! - `device` - The facade implementation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bean_stream::{BeanStream, ReadingKind, StreamConfig};
//! use bean_stream_ble::{BleBean, BleBeanConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bean = BleBean::open("C4:BE:84:12:34:56", BleBeanConfig::new()).await?;
//! let config = StreamConfig::new()
//!     .with_poll_interval(Duration::from_secs(5))
//!     .with_poll_target(ReadingKind::Battery)
//!     .with_notify_target(ReadingKind::Scratch(1));
//!
//! let stream = BeanStream::new(Arc::new(bean), config);
//! let mut readings = stream.start().await?;
//! while let Some(reading) = readings.next().await {
//!     println!("{:?}", reading);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Peripherals are opened by address (or local name); general device
//! discovery and pairing are left to platform tools.

pub mod config;
pub mod error;
pub mod protocol;

mod device;

pub use config::{BleBeanConfig, CharacteristicMap};
pub use device::BleBean;
pub use error::{BleBeanError, Result};
