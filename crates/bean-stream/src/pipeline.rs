//! Shared producer path: normalize, report, push

use std::sync::Arc;

use tracing::warn;

use crate::events::{publish, EventSender, StreamEvent};
use crate::normalizer::normalize;
use crate::reading::{Reading, ReadingKind, Timestamp};
use crate::sequencer::{PushOutcome, Sequencer};

/// Everything a producer needs to hand readings to the sequencer
#[derive(Clone)]
pub(crate) struct Pipeline {
    device_id: Arc<str>,
    sequencer: Arc<Sequencer>,
    events: EventSender,
}

impl Pipeline {
    pub fn new(device_id: impl Into<Arc<str>>, sequencer: Arc<Sequencer>, events: EventSender) -> Self {
        Self {
            device_id: device_id.into(),
            sequencer,
            events,
        }
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn publish(&self, event: StreamEvent) {
        publish(&self.events, event);
    }

    /// Decode a raw value; decode failures are reported and yield `None`
    pub fn normalize(&self, source: ReadingKind, raw: &[u8], captured_at: Timestamp) -> Option<Reading> {
        match normalize(&self.device_id, source, raw, captured_at) {
            Ok(reading) => Some(reading),
            Err(error) => {
                warn!("Dropping undecodable {} value from {}: {}", source, self.device_id, error);
                self.publish(StreamEvent::DecodeFailed { source, error });
                None
            }
        }
    }

    /// Normalize and push; an undecodable value counts as filtered
    pub async fn deliver(&self, source: ReadingKind, raw: &[u8], captured_at: Timestamp) -> PushOutcome {
        match self.normalize(source, raw, captured_at) {
            Some(reading) => self.sequencer.push(reading).await,
            None => PushOutcome::Filtered,
        }
    }
}
