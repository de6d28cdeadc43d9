//! GATT identities for the supported cycling sensors.
//!
//! Standard Bluetooth SIG UUIDs for heart rate, cycling speed/cadence and
//! cycling power, plus the Elite trainer's vendor-specific service for
//! resistance control.

use uuid::Uuid;

// Services

/// Heart Rate Service (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Speed and Cadence Service (0x1816)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Service (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Elite Real Trainer vendor service
pub const ELITE_TRAINER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x347b0001_7635_408b_8918_8ff3949ce592);

// Characteristics

/// Heart Rate Measurement (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// CSC Measurement (0x2A5B)
pub const CSC_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a5b_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Feature (0x2A65)
pub const CYCLING_POWER_FEATURE_UUID: Uuid =
    Uuid::from_u128(0x0000_2a65_0000_1000_8000_0080_5f9b_34fb);

/// Elite trainer brake control (write target power / resistance level)
pub const ELITE_TRAINER_BRAKE_UUID: Uuid =
    Uuid::from_u128(0x347b0010_7635_408b_8918_8ff3949ce592);

/// Elite trainer "resistance out of range" flag
pub const ELITE_OUT_OF_RANGE_UUID: Uuid =
    Uuid::from_u128(0x347b0011_7635_408b_8918_8ff3949ce592);

/// Services whose presence in an advertisement marks a device as a supported
/// cycling sensor.
pub const SUPPORTED_SERVICE_UUIDS: [Uuid; 4] = [
    HEART_RATE_SERVICE_UUID,
    CSC_SERVICE_UUID,
    CYCLING_POWER_SERVICE_UUID,
    ELITE_TRAINER_SERVICE_UUID,
];

/// Characteristics we enable notifications on after service discovery.
pub const NOTIFY_CHARACTERISTIC_UUIDS: [Uuid; 4] = [
    HEART_RATE_MEASUREMENT_UUID,
    CSC_MEASUREMENT_UUID,
    CYCLING_POWER_MEASUREMENT_UUID,
    ELITE_OUT_OF_RANGE_UUID,
];

/// Identity of an incoming frame, derived from its characteristic UUID.
/// Frames from characteristics outside the closed set fall through to the
/// generic hex decoder via `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicKind {
    HeartRateMeasurement,
    CscMeasurement,
    CyclingPowerMeasurement,
    CyclingPowerFeature,
    EliteOutOfRange,
    Unknown(Uuid),
}

impl CharacteristicKind {
    pub fn from_uuid(uuid: Uuid) -> Self {
        match uuid {
            HEART_RATE_MEASUREMENT_UUID => CharacteristicKind::HeartRateMeasurement,
            CSC_MEASUREMENT_UUID => CharacteristicKind::CscMeasurement,
            CYCLING_POWER_MEASUREMENT_UUID => CharacteristicKind::CyclingPowerMeasurement,
            CYCLING_POWER_FEATURE_UUID => CharacteristicKind::CyclingPowerFeature,
            ELITE_OUT_OF_RANGE_UUID => CharacteristicKind::EliteOutOfRange,
            other => CharacteristicKind::Unknown(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CharacteristicKind::HeartRateMeasurement => "Heart Rate Measurement",
            CharacteristicKind::CscMeasurement => "CSC Measurement",
            CharacteristicKind::CyclingPowerMeasurement => "Cycling Power Measurement",
            CharacteristicKind::CyclingPowerFeature => "Cycling Power Feature",
            CharacteristicKind::EliteOutOfRange => "Elite Out of Range Flag",
            CharacteristicKind::Unknown(_) => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_uuids_map_to_kinds() {
        assert_eq!(
            CharacteristicKind::from_uuid(HEART_RATE_MEASUREMENT_UUID),
            CharacteristicKind::HeartRateMeasurement
        );
        assert_eq!(
            CharacteristicKind::from_uuid(CSC_MEASUREMENT_UUID),
            CharacteristicKind::CscMeasurement
        );
        assert_eq!(
            CharacteristicKind::from_uuid(ELITE_OUT_OF_RANGE_UUID),
            CharacteristicKind::EliteOutOfRange
        );
    }

    #[test]
    fn test_unrecognized_uuid_is_unknown() {
        let uuid = Uuid::from_u128(0x0000_2a08_0000_1000_8000_0080_5f9b_34fb);
        assert_eq!(
            CharacteristicKind::from_uuid(uuid),
            CharacteristicKind::Unknown(uuid)
        );
    }
}
