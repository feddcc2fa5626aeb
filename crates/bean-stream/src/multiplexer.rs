//! Notification multiplexer
//!
//! One forwarding path per subscribed source, each under the sequencer's
//! backpressure contract:
//!
//! - [`FlowControl::Lossless`] sources are pulled only after the previous
//!   notification was accepted, so a full sequencer stalls the device.
//! - [`FlowControl::Lossy`] sources are drained eagerly into a one-reading
//!   pending slot after the transform hook has seen them. A newer arrival
//!   replaces an undelivered one (newest wins) and a
//!   [`StreamEvent::NotificationDropped`] is published.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::device::{CommandGate, DeviceResult, FlowControl, Subscription};
use crate::events::StreamEvent;
use crate::pipeline::Pipeline;
use crate::reading::{Reading, ReadingKind, Timestamp};
use crate::sequencer::PushOutcome;

// ----------------------------------------------------------------------------
// Arming
// ----------------------------------------------------------------------------

/// Sources that were subscribed and the tasks forwarding them
#[derive(Default)]
pub(crate) struct ArmedSources {
    pub subscribed: Vec<ReadingKind>,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Subscribe to every target and start forwarding; a failed subscription is
/// reported and the remaining targets are still armed
pub(crate) async fn arm(
    gate: &CommandGate,
    pipeline: &Pipeline,
    targets: &[ReadingKind],
) -> ArmedSources {
    let mut armed = ArmedSources::default();

    for &source in targets {
        match gate.subscribe(source).await {
            Ok(subscription) => {
                info!("Subscribed to {} notifications ({:?})", source, subscription.flow);
                armed.subscribed.push(source);
                armed
                    .tasks
                    .extend(spawn_forwarder(source, subscription, pipeline.clone()));
            }
            Err(error) => {
                warn!("Failed to subscribe to {}: {}", source, error);
                pipeline.publish(StreamEvent::SubscribeFailed { source, error });
            }
        }
    }

    armed
}

fn spawn_forwarder(
    source: ReadingKind,
    subscription: Subscription,
    pipeline: Pipeline,
) -> Vec<JoinHandle<()>> {
    match subscription.flow {
        FlowControl::Lossless => vec![tokio::spawn(forward_lossless(
            source,
            subscription.notifications,
            pipeline,
        ))],
        FlowControl::Lossy => {
            let slot = Arc::new(PendingSlot::default());
            vec![
                tokio::spawn(drain_lossy(
                    source,
                    subscription.notifications,
                    slot.clone(),
                    pipeline.clone(),
                )),
                tokio::spawn(forward_pending(source, slot, pipeline)),
            ]
        }
    }
}

/// Next notification, or `None` once the source or the sequence is finished
async fn next_notification(
    notifications: &mut BoxStream<'static, DeviceResult<Vec<u8>>>,
    pipeline: &Pipeline,
) -> Option<DeviceResult<Vec<u8>>> {
    tokio::select! {
        item = notifications.next() => item,
        _ = pipeline.sequencer().closed() => None,
    }
}

fn source_closed(source: ReadingKind, pipeline: &Pipeline) {
    if !pipeline.sequencer().is_ended() {
        info!("{} notifications closed by device", source);
        pipeline.publish(StreamEvent::SourceClosed { source });
    }
}

// ----------------------------------------------------------------------------
// Lossless Forwarding
// ----------------------------------------------------------------------------

async fn forward_lossless(
    source: ReadingKind,
    mut notifications: BoxStream<'static, DeviceResult<Vec<u8>>>,
    pipeline: Pipeline,
) {
    while let Some(item) = next_notification(&mut notifications, &pipeline).await {
        match item {
            Ok(raw) => {
                let captured_at = Timestamp::now();
                if pipeline.deliver(source, &raw, captured_at).await == PushOutcome::Discarded {
                    debug!("{} forwarder stopping, sequence ended", source);
                    return;
                }
            }
            Err(error) => {
                warn!("{} notification failed: {}", source, error);
                pipeline.publish(StreamEvent::NotificationFailed { source, error });
            }
        }
    }
    source_closed(source, &pipeline);
}

// ----------------------------------------------------------------------------
// Lossy Forwarding
// ----------------------------------------------------------------------------

#[derive(Default)]
struct SlotState {
    pending: Option<Reading>,
    closed: bool,
}

/// Holds at most one undelivered reading for a source
#[derive(Default)]
struct PendingSlot {
    state: Mutex<SlotState>,
    ready: Notify,
}

impl PendingSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a reading; returns `true` if it replaced an undelivered one
    fn offer(&self, reading: Reading) -> bool {
        let replaced = self.lock().pending.replace(reading).is_some();
        self.ready.notify_one();
        replaced
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_one();
    }

    fn take(&self) -> Option<Reading> {
        self.lock().pending.take()
    }

    /// Wait until a reading is pending; `false` once closed and empty
    async fn ready(&self) -> bool {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.lock();
                if state.pending.is_some() {
                    return true;
                }
                if state.closed {
                    return false;
                }
            }

            notified.await;
        }
    }
}

async fn drain_lossy(
    source: ReadingKind,
    mut notifications: BoxStream<'static, DeviceResult<Vec<u8>>>,
    slot: Arc<PendingSlot>,
    pipeline: Pipeline,
) {
    while let Some(item) = next_notification(&mut notifications, &pipeline).await {
        match item {
            Ok(raw) => {
                let captured_at = Timestamp::now();
                let Some(reading) = pipeline.normalize(source, &raw, captured_at) else {
                    continue;
                };
                match pipeline.sequencer().admit(reading) {
                    Ok(reading) => {
                        if slot.offer(reading) {
                            debug!("{} notification replaced an undelivered one", source);
                            pipeline.publish(StreamEvent::NotificationDropped { source });
                        }
                    }
                    Err(PushOutcome::Discarded) => break,
                    Err(_) => {}
                }
            }
            Err(error) => {
                warn!("{} notification failed: {}", source, error);
                pipeline.publish(StreamEvent::NotificationFailed { source, error });
            }
        }
    }
    slot.close();
    source_closed(source, &pipeline);
}

async fn forward_pending(source: ReadingKind, slot: Arc<PendingSlot>, pipeline: Pipeline) {
    loop {
        let ready = tokio::select! {
            ready = slot.ready() => ready,
            _ = pipeline.sequencer().closed() => false,
        };
        if !ready {
            break;
        }

        // Wait for room first so the slot keeps collecting the newest arrival
        let Some(permit) = pipeline.sequencer().reserve().await else {
            break;
        };
        let Some(reading) = slot.take() else {
            continue;
        };
        if permit.send(reading) == PushOutcome::Discarded {
            break;
        }
    }
    debug!("{} pending forwarder stopped", source);
}
