//! Observable stream events
//!
//! Per-reading problems never fail the stream. They are published here so the
//! caller can decide whether to log, count or abort.

use tokio::sync::broadcast;

use crate::errors::{DecodeError, DeviceError};
use crate::reading::ReadingKind;

/// Why a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndCause {
    /// Consumer requested stop
    Stopped,
    /// Device reported the link went away
    Disconnected,
    /// Too many consecutive capability failures
    Failed,
    /// A second stop arrived while teardown was in progress
    Forced,
}

/// Events published while a stream runs
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A raw value could not be decoded and was dropped
    DecodeFailed {
        source: ReadingKind,
        error: DecodeError,
    },
    /// A poll read failed; the reading was skipped
    ReadFailed {
        source: ReadingKind,
        error: DeviceError,
    },
    /// Subscribing to a notification source failed; other sources are unaffected
    SubscribeFailed {
        source: ReadingKind,
        error: DeviceError,
    },
    /// A notification source delivered an error instead of a value
    NotificationFailed {
        source: ReadingKind,
        error: DeviceError,
    },
    /// An undelivered notification was replaced by a newer one
    NotificationDropped { source: ReadingKind },
    /// A notification source stopped producing
    SourceClosed { source: ReadingKind },
    /// The stream reached its terminal state
    Ended { cause: EndCause },
}

pub type EventSender = broadcast::Sender<StreamEvent>;
pub type EventReceiver = broadcast::Receiver<StreamEvent>;

/// Create the event channel for one stream
pub fn create_event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}

/// Publish an event; having no subscribers is not an error
pub(crate) fn publish(sender: &EventSender, event: StreamEvent) {
    let _ = sender.send(event);
}
