//! Bean facade over a btleplug peripheral

use std::time::Duration;

use async_trait::async_trait;
use bean_stream::{
    BeanDevice, DeviceError, DeviceResult, FlowControl, LinkState, ReadingKind, Subscription,
};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future;
use futures::stream::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::BleBeanConfig;
use crate::error::{BleBeanError, Result};
use crate::protocol::BEAN_ADVERTISED_SERVICES;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ----------------------------------------------------------------------------
// BLE Bean
// ----------------------------------------------------------------------------

/// A Bean reached through the host's BLE adapter
pub struct BleBean {
    id: String,
    config: BleBeanConfig,
    peripheral: Peripheral,
    link: watch::Sender<LinkState>,
    events_task: JoinHandle<()>,
}

impl BleBean {
    /// Scan for the peripheral whose address or local name equals `target`
    ///
    /// Scanning stops as soon as it is found; the link is not opened until
    /// [`BeanDevice::connect`].
    pub async fn open(target: &str, config: BleBeanConfig) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BleBeanError::AdapterNotAvailable)?;

        let peripheral = find_peripheral(&adapter, target, &config).await?;
        let id = match peripheral.properties().await? {
            Some(properties) => properties.address.to_string(),
            None => target.to_string(),
        };
        info!("Found Bean {} ({})", target, id);

        let connected = peripheral.is_connected().await.unwrap_or(false);
        let (link, _) = watch::channel(if connected {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        });
        let events_task = tokio::spawn(watch_disconnects(adapter, peripheral.clone(), link.clone()));

        Ok(Self {
            id,
            config,
            peripheral,
            link,
            events_task,
        })
    }

    pub fn config(&self) -> &BleBeanConfig {
        &self.config
    }

    fn characteristic(&self, kind: ReadingKind) -> Result<Characteristic> {
        let uuid = self
            .config
            .characteristics
            .uuid_for(kind)
            .ok_or_else(|| BleBeanError::Unmapped {
                kind: kind.to_string(),
            })?;
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .ok_or_else(|| BleBeanError::CharacteristicNotFound {
                characteristic: format!("{} ({})", kind, uuid),
            })
    }

    async fn open_link(&self) -> Result<()> {
        if self.peripheral.is_connected().await? {
            return Ok(());
        }

        timeout(self.config.connection_timeout, self.peripheral.connect())
            .await
            .map_err(|_| BleBeanError::ConnectionTimeout)??;
        self.peripheral.discover_services().await?;

        info!(
            "Connected to Bean {} ({} characteristics)",
            self.id,
            self.peripheral.characteristics().len()
        );
        self.link.send_replace(LinkState::Connected);
        Ok(())
    }
}

impl Drop for BleBean {
    fn drop(&mut self) {
        self.events_task.abort();
    }
}

async fn find_peripheral(adapter: &Adapter, target: &str, config: &BleBeanConfig) -> Result<Peripheral> {
    let filter = ScanFilter {
        services: if config.filter_services {
            BEAN_ADVERTISED_SERVICES.to_vec()
        } else {
            Vec::new()
        },
    };
    adapter.start_scan(filter).await?;
    info!("Scanning for Bean {}", target);

    let deadline = Instant::now() + config.scan_timeout;
    let found = loop {
        if let Some(peripheral) = match_peripheral(adapter, target).await? {
            break Some(peripheral);
        }
        if Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(SCAN_POLL_INTERVAL).await;
    };

    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop BLE scan: {}", e);
    }

    found.ok_or_else(|| BleBeanError::NotFound {
        target: target.to_string(),
        seconds: config.scan_timeout.as_secs(),
    })
}

async fn match_peripheral(adapter: &Adapter, target: &str) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        let Some(properties) = peripheral.properties().await? else {
            continue;
        };
        let address_matches = properties.address.to_string().eq_ignore_ascii_case(target);
        let name_matches = properties.local_name.as_deref() == Some(target);
        if address_matches || name_matches {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

/// Flip the link state when the adapter reports this peripheral gone
async fn watch_disconnects(adapter: Adapter, peripheral: Peripheral, link: watch::Sender<LinkState>) {
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!("Failed to get BLE events, disconnects will not be reported: {}", e);
            return;
        }
    };

    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDisconnected(id) if id == peripheral.id() => {
                debug!("Adapter reported disconnect of {:?}", id);
                link.send_replace(LinkState::Disconnected);
            }
            CentralEvent::DeviceConnected(id) if id == peripheral.id() => {
                link.send_replace(LinkState::Connected);
            }
            _ => {}
        }
    }
}

// ----------------------------------------------------------------------------
// Facade Implementation
// ----------------------------------------------------------------------------

#[async_trait]
impl BeanDevice for BleBean {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn connect(&self) -> DeviceResult<()> {
        Ok(self.open_link().await?)
    }

    async fn read_characteristic(&self, kind: ReadingKind) -> DeviceResult<Vec<u8>> {
        let characteristic = self.characteristic(kind)?;
        let value = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(|e| DeviceError::ReadFailed {
                characteristic: kind.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Read {}: {}", kind, hex::encode(&value));
        Ok(value)
    }

    async fn write_characteristic(&self, kind: ReadingKind, value: &[u8]) -> DeviceResult<()> {
        let characteristic = self.characteristic(kind)?;
        self.peripheral
            .write(&characteristic, value, WriteType::WithResponse)
            .await
            .map_err(|e| DeviceError::WriteFailed {
                characteristic: kind.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Wrote {}: {}", kind, hex::encode(value));
        Ok(())
    }

    async fn subscribe(&self, kind: ReadingKind) -> DeviceResult<Subscription> {
        let characteristic = self.characteristic(kind)?;
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| DeviceError::SubscriptionFailed {
                characteristic: kind.to_string(),
                reason: e.to_string(),
            })?;

        let uuid = characteristic.uuid;
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| BleBeanError::NotificationStreamFailed(e.to_string()))?
            .filter(move |notification| future::ready(notification.uuid == uuid))
            .map(|notification| Ok(notification.value))
            .boxed();

        // btleplug pushes notifications without flow control
        Ok(Subscription::new(FlowControl::Lossy, notifications))
    }

    async fn unsubscribe(&self, kind: ReadingKind) -> DeviceResult<()> {
        let characteristic = self.characteristic(kind)?;
        self.peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(|e| DeviceError::Other(format!("Failed to unsubscribe from {}: {}", kind, e)))
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        let result = self.peripheral.disconnect().await;
        self.link.send_replace(LinkState::Disconnected);
        match result {
            Ok(()) => {
                info!("Disconnected from Bean {}", self.id);
                Ok(())
            }
            Err(e) => Err(BleBeanError::from(e).into()),
        }
    }

    fn link_state(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }
}
