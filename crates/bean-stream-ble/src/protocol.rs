//! Bean GATT service and characteristic UUIDs

use uuid::Uuid;

// ----------------------------------------------------------------------------
// Bean Services
// ----------------------------------------------------------------------------

/// Bean serial transport service
pub const BEAN_SERIAL_SERVICE_UUID: Uuid = Uuid::from_u128(0xA495FF10_C5B1_4B44_B512_1370F02D74DE);

/// Bean serial transport characteristic (notify + write)
pub const BEAN_SERIAL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xA495FF11_C5B1_4B44_B512_1370F02D74DE);

/// Scratch characteristics 1 through 5, in bank order
pub const BEAN_SCRATCH_CHARACTERISTIC_UUIDS: [Uuid; 5] = [
    Uuid::from_u128(0xA495FF21_C5B1_4B44_B512_1370F02D74DE),
    Uuid::from_u128(0xA495FF22_C5B1_4B44_B512_1370F02D74DE),
    Uuid::from_u128(0xA495FF23_C5B1_4B44_B512_1370F02D74DE),
    Uuid::from_u128(0xA495FF24_C5B1_4B44_B512_1370F02D74DE),
    Uuid::from_u128(0xA495FF25_C5B1_4B44_B512_1370F02D74DE),
];

// ----------------------------------------------------------------------------
// Standard Services
// ----------------------------------------------------------------------------

/// Bluetooth SIG battery level characteristic, one byte percent
pub const BATTERY_LEVEL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002A19_0000_1000_8000_00805F9B34FB);

/// Services a Bean advertises; used as the scan filter
pub const BEAN_ADVERTISED_SERVICES: [Uuid; 1] = [BEAN_SERIAL_SERVICE_UUID];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_uuids_in_bank_order() {
        for (slot, uuid) in BEAN_SCRATCH_CHARACTERISTIC_UUIDS.iter().enumerate() {
            assert!(uuid.to_string().starts_with(&format!("a495ff2{}", slot + 1)));
        }
    }

    #[test]
    fn test_battery_uuid_is_sig_base() {
        assert_eq!(
            BATTERY_LEVEL_CHARACTERISTIC_UUID.to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
    }
}
