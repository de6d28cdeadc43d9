//! Outbound resistance commands for the Elite trainer brake.

use serde::{Deserialize, Serialize};

use crate::config::SensorConfig;

/// A resistance command destined for the trainer's brake characteristic.
///
/// The wire format is a mode byte followed by the value: brake commands carry
/// a little-endian 16-bit target, level commands a single byte (the level cap
/// keeps values well under 256).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResistanceCommand {
    /// Constant-power brake mode with a target in watts
    Brake { target_watts: u16 },
    /// Fixed resistance level, clamped to the configured maximum
    Level { level: u16 },
}

impl ResistanceCommand {
    /// Encode for a characteristic write. Fire-and-forget: the trainer sends
    /// no reply on this characteristic.
    pub fn encode(&self, config: &SensorConfig) -> Vec<u8> {
        match *self {
            ResistanceCommand::Brake { target_watts } => vec![
                0x00,
                (target_watts & 0xFF) as u8,
                (target_watts >> 8) as u8,
            ],
            ResistanceCommand::Level { level } => {
                let clamped = level.min(config.max_power_level);
                vec![0x01, (clamped & 0xFF) as u8]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brake_encodes_little_endian_target() {
        let cmd = ResistanceCommand::Brake { target_watts: 500 };
        assert_eq!(cmd.encode(&SensorConfig::default()), vec![0x00, 0xF4, 0x01]);
    }

    #[test]
    fn test_level_is_clamped_to_configured_maximum() {
        let cmd = ResistanceCommand::Level { level: 250 };
        assert_eq!(cmd.encode(&SensorConfig::default()), vec![0x01, 200]);
    }

    #[test]
    fn test_level_below_maximum_is_unchanged() {
        let cmd = ResistanceCommand::Level { level: 120 };
        assert_eq!(cmd.encode(&SensorConfig::default()), vec![0x01, 120]);
    }

    #[test]
    fn test_level_respects_custom_cap() {
        let config = SensorConfig {
            max_power_level: 150,
            ..SensorConfig::default()
        };
        let cmd = ResistanceCommand::Level { level: 250 };
        assert_eq!(cmd.encode(&config), vec![0x01, 150]);
    }
}
