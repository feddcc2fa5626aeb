//! Device capability facade
//!
//! The stream never talks to a BLE stack directly. It drives a [`BeanDevice`],
//! which exposes the handful of capabilities the adapter needs and hands back
//! raw characteristic values. All commands the adapter issues go through a
//! [`CommandGate`] so at most one is in flight per device, whether or not the
//! underlying transport serializes them itself.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::{watch, Mutex};

use crate::errors::DeviceError;
use crate::reading::ReadingKind;

/// Result type for device operations
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

// ----------------------------------------------------------------------------
// Link State
// ----------------------------------------------------------------------------

/// Radio link state reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

// ----------------------------------------------------------------------------
// Subscriptions
// ----------------------------------------------------------------------------

/// How a notification source reacts when it is not being drained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// The device only produces the next value once the previous one was
    /// pulled; backpressure reaches the radio layer
    Lossless,
    /// The device pushes regardless; the consumer must drain eagerly
    Lossy,
}

/// A live notification feed for one characteristic
pub struct Subscription {
    pub flow: FlowControl,
    pub notifications: BoxStream<'static, DeviceResult<Vec<u8>>>,
}

impl Subscription {
    pub fn new(flow: FlowControl, notifications: BoxStream<'static, DeviceResult<Vec<u8>>>) -> Self {
        Self {
            flow,
            notifications,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Facade Trait
// ----------------------------------------------------------------------------

/// Capabilities of a connected Bean board
///
/// Characteristics are addressed by [`ReadingKind`]; values are raw bytes and
/// their decoding is left to [`crate::normalizer`].
#[async_trait]
pub trait BeanDevice: Send + Sync {
    /// Stable identity of the device, copied into every reading
    fn id(&self) -> String;

    /// Open the link; a no-op for an already connected handle
    async fn connect(&self) -> DeviceResult<()>;

    async fn read_characteristic(&self, characteristic: ReadingKind) -> DeviceResult<Vec<u8>>;

    async fn write_characteristic(
        &self,
        characteristic: ReadingKind,
        value: &[u8],
    ) -> DeviceResult<()>;

    async fn subscribe(&self, characteristic: ReadingKind) -> DeviceResult<Subscription>;

    async fn unsubscribe(&self, characteristic: ReadingKind) -> DeviceResult<()>;

    async fn disconnect(&self) -> DeviceResult<()>;

    /// Watch the link state; flips to [`LinkState::Disconnected`] when the
    /// device goes away for any reason
    fn link_state(&self) -> watch::Receiver<LinkState>;
}

// ----------------------------------------------------------------------------
// Command Serialization
// ----------------------------------------------------------------------------

/// Serializes every command the adapter sends to one device
#[derive(Clone)]
pub struct CommandGate {
    device: Arc<dyn BeanDevice>,
    lock: Arc<Mutex<()>>,
}

impl CommandGate {
    pub fn new(device: Arc<dyn BeanDevice>) -> Self {
        Self {
            device,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.device.link_state()
    }

    pub async fn connect(&self) -> DeviceResult<()> {
        let _guard = self.lock.lock().await;
        self.device.connect().await
    }

    pub async fn read(&self, characteristic: ReadingKind) -> DeviceResult<Vec<u8>> {
        let _guard = self.lock.lock().await;
        self.device.read_characteristic(characteristic).await
    }

    pub async fn write(&self, characteristic: ReadingKind, value: &[u8]) -> DeviceResult<()> {
        let _guard = self.lock.lock().await;
        self.device.write_characteristic(characteristic, value).await
    }

    pub async fn subscribe(&self, characteristic: ReadingKind) -> DeviceResult<Subscription> {
        let _guard = self.lock.lock().await;
        self.device.subscribe(characteristic).await
    }

    pub async fn unsubscribe(&self, characteristic: ReadingKind) -> DeviceResult<()> {
        let _guard = self.lock.lock().await;
        self.device.unsubscribe(characteristic).await
    }

    pub async fn disconnect(&self) -> DeviceResult<()> {
        let _guard = self.lock.lock().await;
        self.device.disconnect().await
    }
}
