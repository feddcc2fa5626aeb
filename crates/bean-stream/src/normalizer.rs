//! Raw device values to typed readings
//!
//! Normalization is a pure function of `(device, kind, raw bytes, capture time)`.
//! It never suspends and never touches the device; a malformed value yields a
//! [`DecodeError`] and the caller drops the event.

use crate::errors::DecodeError;
use crate::reading::{Payload, Reading, ReadingKind, ScratchValue, Timestamp, Vector3};

/// Bean accelerometer resolution in g per count (±2g range)
pub const ACCEL_G_PER_COUNT: f64 = 0.00391;

/// Largest value a Bean scratch bank can hold
pub const MAX_SCRATCH_LEN: usize = 20;

/// Number of scratch banks on a Bean
pub const SCRATCH_BANKS: u8 = 5;

/// Decode a raw characteristic value into a [`Reading`]
pub fn normalize(
    device: &str,
    kind: ReadingKind,
    raw: &[u8],
    captured_at: Timestamp,
) -> Result<Reading, DecodeError> {
    let payload = decode_payload(kind, raw)?;
    Ok(Reading::new(device, payload, captured_at))
}

/// Decode the kind-specific payload of a raw value
pub fn decode_payload(kind: ReadingKind, raw: &[u8]) -> Result<Payload, DecodeError> {
    match kind {
        ReadingKind::Battery => {
            let level = exact::<1>(kind, raw)?[0];
            if level > 100 {
                return Err(DecodeError::OutOfRange {
                    kind,
                    value: level as i64,
                });
            }
            Ok(Payload::Battery { level })
        }
        ReadingKind::Temperature => {
            let celsius = exact::<1>(kind, raw)?[0] as i8;
            Ok(Payload::Temperature { celsius })
        }
        ReadingKind::Accelerometer => {
            let bytes = exact::<6>(kind, raw)?;
            let axis = |i: usize| {
                i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]) as f64 * ACCEL_G_PER_COUNT
            };
            Ok(Payload::Accelerometer(Vector3 {
                x: axis(0),
                y: axis(1),
                z: axis(2),
            }))
        }
        ReadingKind::Scratch(index) => {
            if raw.is_empty() || raw.len() > MAX_SCRATCH_LEN {
                return Err(DecodeError::Length {
                    kind,
                    expected: format!("1..={}", MAX_SCRATCH_LEN),
                    actual: raw.len(),
                });
            }
            Ok(Payload::Scratch {
                index,
                value: scratch_views(raw),
            })
        }
        ReadingKind::Serial => {
            if raw.is_empty() {
                return Err(DecodeError::Length {
                    kind,
                    expected: "at least 1".to_string(),
                    actual: 0,
                });
            }
            Ok(Payload::Serial {
                data: raw.to_vec(),
            })
        }
        ReadingKind::Merged => Err(DecodeError::NotDecodable { kind }),
    }
}

fn exact<'a, const N: usize>(kind: ReadingKind, raw: &'a [u8]) -> Result<&'a [u8; N], DecodeError> {
    raw.try_into().map_err(|_| DecodeError::Length {
        kind,
        expected: N.to_string(),
        actual: raw.len(),
    })
}

fn scratch_views(raw: &[u8]) -> ScratchValue {
    let width = raw.len().min(4);
    let mut word = [0u8; 4];
    word[..width].copy_from_slice(&raw[..width]);
    let uint = u32::from_le_bytes(word);

    // Sign-extend from the top bit of the last byte present
    let shift = 32 - (width as u32 * 8);
    let int = ((uint << shift) as i32) >> shift;

    ScratchValue {
        data: String::from_utf8_lossy(raw).into_owned(),
        int,
        uint,
        bytes: raw.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AT: Timestamp = Timestamp::new(42);

    #[test]
    fn test_battery() {
        let reading = normalize("b", ReadingKind::Battery, &[87], AT).unwrap();
        assert_eq!(reading.payload, Payload::Battery { level: 87 });
        assert_eq!(reading.captured_at, AT);
        assert_eq!(reading.device, "b");

        assert!(matches!(
            normalize("b", ReadingKind::Battery, &[101], AT),
            Err(DecodeError::OutOfRange { value: 101, .. })
        ));
        assert!(matches!(
            normalize("b", ReadingKind::Battery, &[1, 2], AT),
            Err(DecodeError::Length { actual: 2, .. })
        ));
    }

    #[test]
    fn test_temperature_is_signed() {
        let payload = decode_payload(ReadingKind::Temperature, &[0xF6]).unwrap();
        assert_eq!(payload, Payload::Temperature { celsius: -10 });
    }

    #[test]
    fn test_accelerometer_scaling() {
        // x = 256, y = -256, z = 0
        let raw = [0x00, 0x01, 0x00, 0xFF, 0x00, 0x00];
        let payload = decode_payload(ReadingKind::Accelerometer, &raw).unwrap();
        match payload {
            Payload::Accelerometer(v) => {
                assert!((v.x - 256.0 * ACCEL_G_PER_COUNT).abs() < 1e-9);
                assert!((v.y + 256.0 * ACCEL_G_PER_COUNT).abs() < 1e-9);
                assert_eq!(v.z, 0.0);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        assert!(decode_payload(ReadingKind::Accelerometer, &[0; 5]).is_err());
    }

    #[test]
    fn test_scratch_views() {
        let payload = decode_payload(ReadingKind::Scratch(1), &[0xFF]).unwrap();
        match payload {
            Payload::Scratch { index, value } => {
                assert_eq!(index, 1);
                assert_eq!(value.int, -1);
                assert_eq!(value.uint, 255);
                assert_eq!(value.bytes, vec![0xFF]);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let payload = decode_payload(ReadingKind::Scratch(2), b"hello").unwrap();
        match payload {
            Payload::Scratch { value, .. } => {
                assert_eq!(value.data, "hello");
                assert_eq!(value.uint, u32::from_le_bytes(*b"hell"));
                assert_eq!(value.int, i32::from_le_bytes(*b"hell"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_scratch_length_limits() {
        assert!(decode_payload(ReadingKind::Scratch(1), &[]).is_err());
        assert!(decode_payload(ReadingKind::Scratch(1), &[0; 21]).is_err());
        assert!(decode_payload(ReadingKind::Scratch(1), &[0; 20]).is_ok());
    }

    #[test]
    fn test_serial_and_merged() {
        assert_eq!(
            decode_payload(ReadingKind::Serial, b"abc").unwrap(),
            Payload::Serial {
                data: b"abc".to_vec()
            }
        );
        assert!(decode_payload(ReadingKind::Serial, b"").is_err());
        assert_eq!(
            decode_payload(ReadingKind::Merged, b"x"),
            Err(DecodeError::NotDecodable {
                kind: ReadingKind::Merged
            })
        );
    }
}
