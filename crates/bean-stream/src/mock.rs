//! In-memory Bean for tests and demos
//!
//! Poll reads return scripted results (queued results first, then a fixed
//! value), notifications are injected by the test, and every command the
//! adapter issues is recorded for verification.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::device::{BeanDevice, DeviceResult, FlowControl, LinkState, Subscription};
use crate::errors::DeviceError;
use crate::reading::ReadingKind;

/// A command received by the mock, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Connect,
    Read(ReadingKind),
    Write(ReadingKind, Vec<u8>),
    Subscribe(ReadingKind),
    Unsubscribe(ReadingKind),
    Disconnect,
}

enum NotifySender {
    Bounded(mpsc::Sender<DeviceResult<Vec<u8>>>),
    Unbounded(mpsc::UnboundedSender<DeviceResult<Vec<u8>>>),
}

#[derive(Default)]
struct MockState {
    connected: bool,
    connect_error: Option<DeviceError>,
    values: HashMap<ReadingKind, Vec<u8>>,
    scripted: HashMap<ReadingKind, VecDeque<DeviceResult<Vec<u8>>>>,
    flows: HashMap<ReadingKind, FlowControl>,
    subscribe_failures: HashSet<ReadingKind>,
    senders: HashMap<ReadingKind, NotifySender>,
    connect_delay: Option<Duration>,
    disconnect_delay: Option<Duration>,
    calls: Vec<DeviceCall>,
}

// ----------------------------------------------------------------------------
// Mock Bean
// ----------------------------------------------------------------------------

/// In-memory [`BeanDevice`]
pub struct MockBean {
    id: String,
    state: Arc<Mutex<MockState>>,
    link: watch::Sender<LinkState>,
}

impl MockBean {
    /// Create a disconnected mock with no readable characteristics
    pub fn new(id: impl Into<String>) -> Self {
        let (link, _) = watch::channel(LinkState::Disconnected);
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(MockState::default())),
            link,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Value returned by every read of `kind` once scripted results run out
    pub fn with_value(self, kind: ReadingKind, value: impl Into<Vec<u8>>) -> Self {
        self.set_value(kind, value);
        self
    }

    /// Allow subscriptions to `kind` with the given flow control
    pub fn with_notify_source(self, kind: ReadingKind, flow: FlowControl) -> Self {
        self.lock().flows.insert(kind, flow);
        self
    }

    pub fn set_value(&self, kind: ReadingKind, value: impl Into<Vec<u8>>) {
        self.lock().values.insert(kind, value.into());
    }

    /// Queue one result for the next read of `kind`
    pub fn script_read(&self, kind: ReadingKind, result: DeviceResult<Vec<u8>>) {
        self.lock().scripted.entry(kind).or_default().push_back(result);
    }

    pub fn fail_connect(&self, error: DeviceError) {
        self.lock().connect_error = Some(error);
    }

    pub fn fail_subscribe(&self, kind: ReadingKind) {
        self.lock().subscribe_failures.insert(kind);
    }

    /// Make `connect` take this long to complete
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    /// Make `disconnect` take this long to complete
    pub fn set_disconnect_delay(&self, delay: Duration) {
        self.lock().disconnect_delay = Some(delay);
    }

    /// Deliver a notification; waits while a lossless source is not drained.
    /// Returns `false` when nobody is subscribed to `kind`.
    pub async fn notify(&self, kind: ReadingKind, value: impl Into<Vec<u8>>) -> bool {
        self.send(kind, Ok(value.into())).await
    }

    /// Deliver an error on a notification source
    pub async fn notify_error(&self, kind: ReadingKind, error: DeviceError) -> bool {
        self.send(kind, Err(error)).await
    }

    async fn send(&self, kind: ReadingKind, item: DeviceResult<Vec<u8>>) -> bool {
        let bounded = {
            let state = self.lock();
            match state.senders.get(&kind) {
                Some(NotifySender::Unbounded(sender)) => return sender.send(item).is_ok(),
                Some(NotifySender::Bounded(sender)) => sender.clone(),
                None => return false,
            }
        };
        bounded.send(item).await.is_ok()
    }

    /// End the notification feed for `kind`, as a device dropping it would
    pub fn close_notifications(&self, kind: ReadingKind) {
        self.lock().senders.remove(&kind);
    }

    /// Simulate the radio link going away
    pub fn drop_link(&self) {
        {
            let mut state = self.lock();
            state.connected = false;
            state.senders.clear();
        }
        self.link.send_replace(LinkState::Disconnected);
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Every command received so far
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().calls.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.count(|call| *call == DeviceCall::Connect)
    }

    pub fn disconnect_count(&self) -> usize {
        self.count(|call| *call == DeviceCall::Disconnect)
    }

    pub fn read_count(&self, kind: ReadingKind) -> usize {
        self.count(|call| *call == DeviceCall::Read(kind))
    }

    pub fn unsubscribe_count(&self, kind: ReadingKind) -> usize {
        self.count(|call| *call == DeviceCall::Unsubscribe(kind))
    }

    fn count(&self, matches: impl Fn(&DeviceCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| matches(call)).count()
    }
}

// ----------------------------------------------------------------------------
// Facade Implementation
// ----------------------------------------------------------------------------

#[async_trait]
impl BeanDevice for MockBean {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn connect(&self) -> DeviceResult<()> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(DeviceCall::Connect);
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut state = self.lock();
            if let Some(error) = state.connect_error.clone() {
                return Err(error);
            }
            state.connected = true;
        }
        self.link.send_replace(LinkState::Connected);
        Ok(())
    }

    async fn read_characteristic(&self, characteristic: ReadingKind) -> DeviceResult<Vec<u8>> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::Read(characteristic));
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        if let Some(result) = state
            .scripted
            .get_mut(&characteristic)
            .and_then(VecDeque::pop_front)
        {
            return result;
        }
        state
            .values
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| DeviceError::Unsupported {
                characteristic: characteristic.to_string(),
            })
    }

    async fn write_characteristic(
        &self,
        characteristic: ReadingKind,
        value: &[u8],
    ) -> DeviceResult<()> {
        let mut state = self.lock();
        state
            .calls
            .push(DeviceCall::Write(characteristic, value.to_vec()));
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        state.values.insert(characteristic, value.to_vec());
        Ok(())
    }

    async fn subscribe(&self, characteristic: ReadingKind) -> DeviceResult<Subscription> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::Subscribe(characteristic));
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        if state.subscribe_failures.contains(&characteristic) {
            return Err(DeviceError::SubscriptionFailed {
                characteristic: characteristic.to_string(),
                reason: "mock refused subscription".to_string(),
            });
        }
        let flow = state
            .flows
            .get(&characteristic)
            .copied()
            .ok_or_else(|| DeviceError::Unsupported {
                characteristic: characteristic.to_string(),
            })?;

        let notifications = match flow {
            FlowControl::Lossless => {
                let (sender, receiver) = mpsc::channel(1);
                state
                    .senders
                    .insert(characteristic, NotifySender::Bounded(sender));
                stream::unfold(receiver, |mut receiver| async move {
                    let item = receiver.recv().await?;
                    Some((item, receiver))
                })
                .boxed()
            }
            FlowControl::Lossy => {
                let (sender, receiver) = mpsc::unbounded_channel();
                state
                    .senders
                    .insert(characteristic, NotifySender::Unbounded(sender));
                stream::unfold(receiver, |mut receiver| async move {
                    let item = receiver.recv().await?;
                    Some((item, receiver))
                })
                .boxed()
            }
        };

        Ok(Subscription::new(flow, notifications))
    }

    async fn unsubscribe(&self, characteristic: ReadingKind) -> DeviceResult<()> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::Unsubscribe(characteristic));
        state.senders.remove(&characteristic);
        Ok(())
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(DeviceCall::Disconnect);
            state.disconnect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut state = self.lock();
            state.connected = false;
            state.senders.clear();
        }
        self.link.send_replace(LinkState::Disconnected);
        Ok(())
    }

    fn link_state(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_reads_then_value() {
        let bean = MockBean::new("bean").with_value(ReadingKind::Battery, vec![80]);
        bean.script_read(ReadingKind::Battery, Err(DeviceError::Other("busy".into())));

        assert_eq!(
            bean.read_characteristic(ReadingKind::Battery).await,
            Err(DeviceError::NotConnected)
        );
        bean.connect().await.unwrap();
        assert!(bean.read_characteristic(ReadingKind::Battery).await.is_err());
        assert_eq!(bean.read_characteristic(ReadingKind::Battery).await, Ok(vec![80]));
        assert_eq!(bean.read_count(ReadingKind::Battery), 3);
    }

    #[tokio::test]
    async fn test_notifications_reach_subscriber() {
        let bean = MockBean::new("bean").with_notify_source(ReadingKind::Serial, FlowControl::Lossy);
        bean.connect().await.unwrap();

        let mut subscription = bean.subscribe(ReadingKind::Serial).await.unwrap();
        assert_eq!(subscription.flow, FlowControl::Lossy);
        assert!(bean.notify(ReadingKind::Serial, b"hi".to_vec()).await);
        assert_eq!(subscription.notifications.next().await, Some(Ok(b"hi".to_vec())));

        bean.close_notifications(ReadingKind::Serial);
        assert_eq!(subscription.notifications.next().await, None);
        assert!(!bean.notify(ReadingKind::Serial, b"late".to_vec()).await);
    }

    #[tokio::test]
    async fn test_write_is_readable() {
        let bean = MockBean::new("bean");
        bean.connect().await.unwrap();
        bean.write_characteristic(ReadingKind::Scratch(2), b"ok").await.unwrap();
        assert_eq!(
            bean.read_characteristic(ReadingKind::Scratch(2)).await,
            Ok(b"ok".to_vec())
        );
    }
}
