//! Reading records produced by the stream

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> std::time::Duration {
        std::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

// ----------------------------------------------------------------------------
// Reading Kind
// ----------------------------------------------------------------------------

/// Source kind of a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadingKind {
    Accelerometer,
    Battery,
    Temperature,
    /// Scratch bank, 1-based
    Scratch(u8),
    Serial,
    /// Produced by merging transforms, never by the device
    Merged,
}

impl ReadingKind {
    /// Key used for this kind in serialized stream objects
    pub fn key(&self) -> String {
        match self {
            ReadingKind::Accelerometer => "accell".to_string(),
            ReadingKind::Battery => "batt".to_string(),
            ReadingKind::Temperature => "temp".to_string(),
            ReadingKind::Scratch(index) => format!("scratch{}", index),
            ReadingKind::Serial => "serial".to_string(),
            ReadingKind::Merged => "merged".to_string(),
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// ----------------------------------------------------------------------------
// Payloads
// ----------------------------------------------------------------------------

/// Acceleration in g along each axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// The three views of a scratch register's bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScratchValue {
    /// Bytes rendered as (lossy) UTF-8
    pub data: String,
    /// Little-endian signed value of the first up-to-4 bytes
    pub int: i32,
    /// Little-endian unsigned value of the first up-to-4 bytes
    pub uint: u32,
    /// Raw register contents
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Kind-specific payload of a reading
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Accelerometer(Vector3),
    Battery { level: u8 },
    Temperature { celsius: i8 },
    Scratch { index: u8, value: ScratchValue },
    Serial { data: Vec<u8> },
    /// Several payloads of the same device folded into one record
    Merged(BTreeMap<ReadingKind, Payload>),
}

impl Payload {
    /// Kind of reading this payload belongs to
    pub fn kind(&self) -> ReadingKind {
        match self {
            Payload::Accelerometer(_) => ReadingKind::Accelerometer,
            Payload::Battery { .. } => ReadingKind::Battery,
            Payload::Temperature { .. } => ReadingKind::Temperature,
            Payload::Scratch { index, .. } => ReadingKind::Scratch(*index),
            Payload::Serial { .. } => ReadingKind::Serial,
            Payload::Merged(_) => ReadingKind::Merged,
        }
    }

    fn serialize_entries<M: SerializeMap>(&self, map: &mut M) -> Result<(), M::Error> {
        #[derive(Serialize)]
        struct Level {
            level: u8,
        }
        #[derive(Serialize)]
        struct Celsius {
            celsius: i8,
        }
        #[derive(Serialize)]
        struct SerialData {
            data: String,
        }

        match self {
            Payload::Accelerometer(vector) => map.serialize_entry("accell", vector),
            Payload::Battery { level } => map.serialize_entry("batt", &Level { level: *level }),
            Payload::Temperature { celsius } => {
                map.serialize_entry("temp", &Celsius { celsius: *celsius })
            }
            Payload::Scratch { index, value } => {
                map.serialize_entry(&ReadingKind::Scratch(*index).key(), value)
            }
            Payload::Serial { data } => map.serialize_entry(
                "serial",
                &SerialData {
                    data: String::from_utf8_lossy(data).into_owned(),
                },
            ),
            Payload::Merged(parts) => {
                for part in parts.values() {
                    part.serialize_entries(map)?;
                }
                Ok(())
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Reading
// ----------------------------------------------------------------------------

/// A single normalized reading from a device
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Identity of the source device
    pub device: String,
    /// Kind-specific payload
    pub payload: Payload,
    /// When the raw data became available to the adapter
    pub captured_at: Timestamp,
}

impl Reading {
    pub fn new(device: impl Into<String>, payload: Payload, captured_at: Timestamp) -> Self {
        Self {
            device: device.into(),
            payload,
            captured_at,
        }
    }

    pub fn kind(&self) -> ReadingKind {
        self.payload.kind()
    }
}

/// Serializes as the flat stream object, e.g.
/// `{"device":"<id>","temp":{"celsius":21},"capturedAt":1700000000000}`
impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("device", &self.device)?;
        self.payload.serialize_entries(&mut map)?;
        map.serialize_entry("capturedAt", &self.captured_at)?;
        map.end()
    }
}
