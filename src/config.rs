//! Configuration management for the cycling sensor sync service.
//!
//! Configuration is loaded in this priority order:
//! 1. Environment variables (highest priority)
//! 2. Config file (config.toml)
//! 3. Built-in defaults (lowest priority)
//!
//! # Environment Variables
//!
//! - `VELO_BLUETOOTH__DEVICE_NAME_FILTER` - Bluetooth device name filter
//! - `VELO_BLUETOOTH__SCAN_TIMEOUT_SECS` - Bluetooth scan timeout in seconds
//! - `VELO_BLUETOOTH__RECONNECT_DELAY_SECS` - Reconnect delay in seconds
//! - `VELO_SERVER__HOST` - HTTP server bind address
//! - `VELO_SERVER__PORT` - HTTP server port
//! - `VELO_SENSOR__WHEEL_CIRCUMFERENCE_MM` - Wheel circumference in millimeters
//! - `VELO_SENSOR__MAX_POWER_LEVEL` - Cap for trainer power-level commands

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bluetooth: BluetoothConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothConfig {
    /// Substring match against advertised device names. Empty matches any
    /// device that advertises a recognized cycling service.
    #[serde(default)]
    pub device_name_filter: String,

    /// Timeout in seconds for scanning for a sensor
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,

    /// Seconds to wait before reconnecting after disconnection
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_scan_timeout() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    5
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_name_filter: String::new(),
            scan_timeout_secs: default_scan_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Per-device measurement settings, user-settable at runtime through the
/// settings API. The decoder and the trainer command encoder both read a
/// snapshot of this per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Wheel circumference in millimeters, used to turn wheel revolutions
    /// into distance
    #[serde(default = "default_wheel_circumference")]
    pub wheel_circumference_mm: u32,

    /// Cap applied to trainer power-level commands
    #[serde(default = "default_max_power_level")]
    pub max_power_level: u16,
}

fn default_wheel_circumference() -> u32 {
    2070
}

fn default_max_power_level() -> u16 {
    200
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            wheel_circumference_mm: default_wheel_circumference(),
            max_power_level: default_max_power_level(),
        }
    }
}

impl Config {
    /// Load configuration from the given file, layered with `VELO_`-prefixed
    /// environment variables. Falls back to defaults if neither is usable.
    pub fn load(path: &str) -> Self {
        let loaded = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("VELO").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize());

        match loaded {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load configuration ({}), using defaults", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sensor.wheel_circumference_mm, 2070);
        assert_eq!(config.sensor.max_power_level, 200);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.bluetooth.scan_timeout_secs, 30);
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[sensor]\nwheel_circumference_mm = 2105\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.sensor.wheel_circumference_mm, 2105);
        assert_eq!(config.sensor.max_power_level, 200);
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
