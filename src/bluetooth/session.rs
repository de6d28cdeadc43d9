//! Per-device decoding session.
//!
//! A [`SensorSession`] ties the connection state machine to a
//! [`TelemetryEngine`]. The transport calls in with one event at a time
//! (connection changes, discovery results, characteristic frames) and the
//! session reacts synchronously, emitting [`SessionEvent`]s for the
//! notification sink. Decoding and command encoding are only valid while
//! connected.

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::control::ResistanceCommand;
use super::decode::{DecodeError, TelemetryEngine, TelemetrySnapshot};
use super::gatt::CharacteristicKind;
use crate::config::SensorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Events the session hands to the notification sink.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    ServicesDiscovered,
    Telemetry {
        characteristic: Uuid,
        snapshot: TelemetrySnapshot,
        summary: String,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("device is not connected")]
    NotConnected,
    #[error(transparent)]
    BadFrame(#[from] DecodeError),
}

#[derive(Debug, Default)]
pub struct SensorSession {
    state: ConnectionState,
    engine: TelemetryEngine,
}

impl SensorSession {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            engine: TelemetryEngine::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// A connection attempt has been issued. Meaningful from Disconnected or
    /// Connecting; once connected, the state is owned by transport reports.
    pub fn connect(&mut self) {
        if self.state != ConnectionState::Connected {
            self.state = ConnectionState::Connecting;
        }
    }

    /// Transport report of a connection change. Returns the event to emit,
    /// or `None` when the report doesn't change anything (a repeated
    /// "connected" is fine and must not re-trigger discovery).
    ///
    /// Disconnecting clears all channel state: rates after a reconnect must
    /// not be computed against counters from the previous connection.
    pub fn on_connection_changed(&mut self, connected: bool) -> Option<SessionEvent> {
        if connected {
            if self.state == ConnectionState::Connected {
                return None;
            }
            self.state = ConnectionState::Connected;
            info!("Connected to sensor");
            Some(SessionEvent::Connected)
        } else {
            if self.state == ConnectionState::Disconnected {
                return None;
            }
            self.state = ConnectionState::Disconnected;
            self.engine.reset();
            info!("Disconnected from sensor");
            Some(SessionEvent::Disconnected)
        }
    }

    /// Transport report of a service discovery result.
    pub fn on_services_discovered(&mut self, success: bool) -> Option<SessionEvent> {
        if success {
            Some(SessionEvent::ServicesDiscovered)
        } else {
            warn!("Service discovery failed");
            None
        }
    }

    /// Decode one frame from a characteristic. Read completions and
    /// notifications both come through here.
    pub fn on_characteristic_frame(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
        config: &SensorConfig,
    ) -> Result<SessionEvent, SessionError> {
        if self.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }

        let kind = CharacteristicKind::from_uuid(characteristic);
        let decoded = self.engine.decode(kind, data, config)?;
        Ok(SessionEvent::Telemetry {
            characteristic,
            snapshot: decoded.snapshot,
            summary: decoded.summary,
        })
    }

    /// Encode a resistance command for the transport to write. Fails rather
    /// than producing bytes no transport could deliver.
    pub fn encode_command(
        &self,
        command: ResistanceCommand,
        config: &SensorConfig,
    ) -> Result<Vec<u8>, SessionError> {
        if self.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        Ok(command.encode(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::gatt::{CSC_MEASUREMENT_UUID, HEART_RATE_MEASUREMENT_UUID};

    fn config() -> SensorConfig {
        SensorConfig::default()
    }

    #[test]
    fn test_connect_transitions_to_connecting() {
        let mut session = SensorSession::new();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session.connect();
        assert_eq!(session.state(), ConnectionState::Connecting);

        // Issuing connect again while already connecting is harmless.
        session.connect();
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_connected_report_is_idempotent() {
        let mut session = SensorSession::new();
        session.connect();

        let event = session.on_connection_changed(true);
        assert!(matches!(event, Some(SessionEvent::Connected)));
        assert_eq!(session.state(), ConnectionState::Connected);

        // A second report changes nothing and triggers nothing.
        assert!(session.on_connection_changed(true).is_none());
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_disconnect_from_any_state() {
        let mut session = SensorSession::new();
        session.connect();
        let event = session.on_connection_changed(false);
        assert!(matches!(event, Some(SessionEvent::Disconnected)));
        assert_eq!(session.state(), ConnectionState::Disconnected);

        // Already disconnected: nothing to report.
        assert!(session.on_connection_changed(false).is_none());
    }

    #[test]
    fn test_frame_rejected_while_not_connected() {
        let mut session = SensorSession::new();
        let result = session.on_characteristic_frame(
            HEART_RATE_MEASUREMENT_UUID,
            &[0x00, 72],
            &config(),
        );
        assert!(matches!(result, Err(SessionError::NotConnected)));

        session.connect();
        let result = session.on_characteristic_frame(
            HEART_RATE_MEASUREMENT_UUID,
            &[0x00, 72],
            &config(),
        );
        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[test]
    fn test_frame_decodes_while_connected() {
        let mut session = SensorSession::new();
        session.connect();
        session.on_connection_changed(true);

        let event = session
            .on_characteristic_frame(HEART_RATE_MEASUREMENT_UUID, &[0x00, 72], &config())
            .unwrap();

        match event {
            SessionEvent::Telemetry {
                characteristic,
                snapshot,
                summary,
            } => {
                assert_eq!(characteristic, HEART_RATE_MEASUREMENT_UUID);
                assert_eq!(snapshot.heart_rate_bpm, Some(72));
                assert_eq!(summary, "heart rate: 72 bpm");
            }
            other => panic!("expected telemetry event, got {:?}", other),
        }
    }

    #[test]
    fn test_reconnect_resets_channel_state() {
        let mut session = SensorSession::new();
        session.on_connection_changed(true);

        let wheel_frame = |revs: u32, time: u16| {
            let mut f = vec![0x01];
            f.extend_from_slice(&revs.to_le_bytes());
            f.extend_from_slice(&time.to_le_bytes());
            f
        };

        session
            .on_characteristic_frame(CSC_MEASUREMENT_UUID, &wheel_frame(1000, 1024), &config())
            .unwrap();

        session.on_connection_changed(false);
        session.on_connection_changed(true);

        // After the reconnect the counters start from zero again.
        let event = session
            .on_characteristic_frame(CSC_MEASUREMENT_UUID, &wheel_frame(10, 512), &config())
            .unwrap();
        let SessionEvent::Telemetry { snapshot, .. } = event else {
            panic!("expected telemetry event");
        };
        let expected = 10.0 * 1024.0 * 3600.0 * 2070.0 / 512.0 / 1_000_000.0;
        assert!((snapshot.speed_kmh.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_command_rejected_while_not_connected() {
        let session = SensorSession::new();
        let result = session.encode_command(
            ResistanceCommand::Level { level: 100 },
            &config(),
        );
        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[test]
    fn test_command_encodes_while_connected() {
        let mut session = SensorSession::new();
        session.on_connection_changed(true);

        let bytes = session
            .encode_command(ResistanceCommand::Level { level: 250 }, &config())
            .unwrap();
        assert_eq!(bytes, vec![0x01, 200]);
    }

    #[test]
    fn test_malformed_frame_surfaces_decode_error() {
        let mut session = SensorSession::new();
        session.on_connection_changed(true);

        let result = session.on_characteristic_frame(
            CSC_MEASUREMENT_UUID,
            &[0x01, 0x00, 0x00],
            &config(),
        );
        assert!(matches!(result, Err(SessionError::BadFrame(_))));
    }
}
