//! Reading transforms
//!
//! Ready-made hooks for [`crate::BeanStream::with_before_push`] and
//! downstream stages.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::reading::{Payload, Reading, ReadingKind, Timestamp};

/// Hook that re-stamps every reading with the time it arrives at the stream
pub fn stamp_captured_at() -> impl FnMut(Reading) -> Option<Reading> + Send + 'static {
    |mut reading: Reading| {
        reading.captured_at = Timestamp::now();
        Some(reading)
    }
}

// ----------------------------------------------------------------------------
// Temperature / Acceleration Coalescing
// ----------------------------------------------------------------------------

/// Folds temperature and acceleration readings of one device into a single
/// [`Payload::Merged`] reading
///
/// A partial row is held until its partner arrives. The first reading of a
/// pair wins: a second temperature arriving before any acceleration is
/// dropped, and the merged reading keeps the earliest capture time. Other
/// kinds are screened out.
#[derive(Debug, Default)]
pub struct Coalescer {
    partial: HashMap<String, Reading>,
    max_age: Option<Duration>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard a held partial once it is older than `max_age` when the next
    /// reading for its device arrives
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Offer a reading; returns the merged reading once a pair is complete
    pub fn offer(&mut self, reading: Reading) -> Option<Reading> {
        if !matches!(
            reading.kind(),
            ReadingKind::Temperature | ReadingKind::Accelerometer
        ) {
            return None;
        }

        let held = match self.partial.remove(&reading.device) {
            Some(held) if self.is_stale(&held, &reading) => {
                debug!("Discarding stale partial {} row for {}", held.kind(), held.device);
                None
            }
            held => held,
        };

        let Some(held) = held else {
            self.partial.insert(reading.device.clone(), reading);
            return None;
        };

        if held.kind() == reading.kind() {
            self.partial.insert(held.device.clone(), held);
            return None;
        }

        let mut parts = BTreeMap::new();
        parts.insert(reading.kind(), reading.payload);
        parts.insert(held.kind(), held.payload);
        Some(Reading::new(held.device, Payload::Merged(parts), held.captured_at))
    }

    /// Number of devices with a partial row held
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    fn is_stale(&self, held: &Reading, incoming: &Reading) -> bool {
        self.max_age
            .map(|max_age| incoming.captured_at.duration_since(held.captured_at) > max_age)
            .unwrap_or(false)
    }

    /// Use as a before-push hook
    pub fn into_hook(mut self) -> impl FnMut(Reading) -> Option<Reading> + Send + 'static {
        move |reading| self.offer(reading)
    }
}

/// Flat temperature / acceleration row, as written by table sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub device: String,
    pub celsius: i8,
    pub accell_x: f64,
    pub accell_y: f64,
    pub accell_z: f64,
    /// Earliest capture time of the pair
    pub captured_at: Timestamp,
}

impl Row {
    /// Build a row from a merged temperature + acceleration reading
    pub fn from_reading(reading: &Reading) -> Option<Self> {
        let Payload::Merged(parts) = &reading.payload else {
            return None;
        };
        let celsius = match parts.get(&ReadingKind::Temperature)? {
            Payload::Temperature { celsius } => *celsius,
            _ => return None,
        };
        let accell = match parts.get(&ReadingKind::Accelerometer)? {
            Payload::Accelerometer(vector) => *vector,
            _ => return None,
        };
        Some(Self {
            device: reading.device.clone(),
            celsius,
            accell_x: accell.x,
            accell_y: accell.y,
            accell_z: accell.z,
            captured_at: reading.captured_at,
        })
    }
}
