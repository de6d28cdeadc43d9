pub mod control;
pub mod decode;
pub mod gatt;
pub mod session;

use anyhow::{anyhow, Result};
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::stream::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{BluetoothConfig, SensorConfig};
use crate::websocket::{broadcast_event, WsMessage};
use control::ResistanceCommand;
use gatt::{
    CharacteristicKind, CYCLING_POWER_FEATURE_UUID, ELITE_TRAINER_BRAKE_UUID,
    NOTIFY_CHARACTERISTIC_UUIDS, SUPPORTED_SERVICE_UUIDS,
};
use session::{ConnectionState, SensorSession, SessionError, SessionEvent};

/// If no notification arrives for this long the connection is assumed lost.
const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the outbound resistance command queue.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Supervises the BLE transport for one cycling sensor: scan, connect,
/// discover, enable notifications, then pump frames through the
/// [`SensorSession`] until the connection drops, and start over.
pub struct SensorBridge {
    config: BluetoothConfig,
    sensor_config: Arc<RwLock<SensorConfig>>,
    status: Arc<RwLock<ConnectionState>>,
    ws_tx: broadcast::Sender<WsMessage>,
    command_rx: mpsc::Receiver<ResistanceCommand>,
    session: SensorSession,
}

impl SensorBridge {
    pub fn new(
        config: BluetoothConfig,
        sensor_config: Arc<RwLock<SensorConfig>>,
        status: Arc<RwLock<ConnectionState>>,
        ws_tx: broadcast::Sender<WsMessage>,
    ) -> (Self, mpsc::Sender<ResistanceCommand>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        (
            Self {
                config,
                sensor_config,
                status,
                ws_tx,
                command_rx,
                session: SensorSession::new(),
            },
            command_tx,
        )
    }

    pub async fn run(mut self) -> Result<()> {
        info!(
            "Starting sensor bridge (scan_timeout={}s, reconnect_delay={}s)",
            self.config.scan_timeout_secs, self.config.reconnect_delay_secs
        );

        let mut reconnect_attempts = 0u32;

        loop {
            match self.connect_and_monitor().await {
                Ok(_) => {
                    info!("Connection cycle completed normally");
                    reconnect_attempts = 0;
                }
                Err(e) => {
                    reconnect_attempts += 1;
                    error!("Connection error (attempt #{}): {}", reconnect_attempts, e);
                }
            }

            if let Some(event) = self.session.on_connection_changed(false) {
                self.emit(event).await;
            }

            info!(
                "Reconnecting in {} seconds...",
                self.config.reconnect_delay_secs
            );
            sleep(Duration::from_secs(self.config.reconnect_delay_secs)).await;
        }
    }

    /// Push a session event to the notification sink and mirror the session
    /// state for the status API.
    async fn emit(&self, event: SessionEvent) {
        *self.status.write().await = self.session.state();
        broadcast_event(&self.ws_tx, &event);
    }

    async fn connect_and_monitor(&mut self) -> Result<()> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No BLE adapter found"))?;

        let peripheral = self.scan_for_sensor(&adapter).await?;

        info!("Found sensor, connecting...");
        self.session.connect();
        *self.status.write().await = self.session.state();
        peripheral.connect().await?;

        if let Some(event) = self.session.on_connection_changed(true) {
            self.emit(event).await;
        }

        // The connection report is what triggers discovery; a repeated report
        // would have returned None above and we would not discover twice.
        let discovered = peripheral.discover_services().await;
        if let Some(event) = self.session.on_services_discovered(discovered.is_ok()) {
            self.emit(event).await;
        }
        discovered?;

        let characteristics = peripheral.characteristics();
        info!("Discovered {} characteristics", characteristics.len());
        for characteristic in &characteristics {
            debug!(
                "  service {}, characteristic {} ({})",
                characteristic.service_uuid,
                characteristic.uuid,
                CharacteristicKind::from_uuid(characteristic.uuid).name()
            );
        }

        let telemetry_chars: Vec<&Characteristic> = characteristics
            .iter()
            .filter(|c| NOTIFY_CHARACTERISTIC_UUIDS.contains(&c.uuid))
            .collect();
        if telemetry_chars.is_empty() {
            warn!("Device exposes none of the supported telemetry characteristics");
            return Err(anyhow!("No recognized telemetry characteristic found"));
        }
        for characteristic in &telemetry_chars {
            self.set_notifications_enabled(&peripheral, characteristic, true)
                .await?;
        }

        // The power feature characteristic is read-only; fetch it once and
        // push it through the same decode path notifications use.
        if let Some(feature) = characteristics
            .iter()
            .find(|c| c.uuid == CYCLING_POWER_FEATURE_UUID)
        {
            match peripheral.read(feature).await {
                Ok(value) => {
                    let sensor_config = *self.sensor_config.read().await;
                    match self.session.on_characteristic_frame(
                        feature.uuid,
                        &value,
                        &sensor_config,
                    ) {
                        Ok(event) => self.emit(event).await,
                        Err(e) => warn!("Failed to decode power feature value: {}", e),
                    }
                }
                Err(e) => warn!("Failed to read power feature characteristic: {}", e),
            }
        }

        let brake = characteristics
            .iter()
            .find(|c| c.uuid == ELITE_TRAINER_BRAKE_UUID)
            .cloned();
        if brake.is_some() {
            info!("Trainer brake characteristic available, resistance control enabled");
        }

        self.monitor(&peripheral, brake).await
    }

    async fn scan_for_sensor(&self, adapter: &Adapter) -> Result<Peripheral> {
        let filter = ScanFilter {
            services: SUPPORTED_SERVICE_UUIDS.to_vec(),
        };
        adapter.start_scan(filter).await?;

        let name_filter = &self.config.device_name_filter;
        if name_filter.is_empty() {
            info!("Scanning for cycling sensors...");
        } else {
            info!("Scanning for cycling sensors matching '{}'...", name_filter);
        }

        for i in 0..self.config.scan_timeout_secs {
            sleep(Duration::from_secs(1)).await;

            for peripheral in adapter.peripherals().await? {
                if let Ok(Some(props)) = peripheral.properties().await {
                    let advertises_supported = props
                        .services
                        .iter()
                        .any(|s| SUPPORTED_SERVICE_UUIDS.contains(s));
                    if !advertises_supported {
                        continue;
                    }

                    let name = props.local_name.unwrap_or_default();
                    if name_filter.is_empty() || name.contains(name_filter.as_str()) {
                        info!("Found sensor '{}' after {} seconds", name, i + 1);
                        adapter.stop_scan().await?;
                        return Ok(peripheral);
                    }
                }
            }
        }

        adapter.stop_scan().await?;
        Err(anyhow!(
            "No cycling sensor found after {} seconds",
            self.config.scan_timeout_secs
        ))
    }

    /// Enable or disable notification delivery for one characteristic.
    /// btleplug owns the client-config descriptor write underneath.
    async fn set_notifications_enabled(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        enabled: bool,
    ) -> Result<()> {
        let name = CharacteristicKind::from_uuid(characteristic.uuid).name();
        if enabled {
            peripheral.subscribe(characteristic).await?;
            info!("Notifications enabled for {}", name);
        } else {
            peripheral.unsubscribe(characteristic).await?;
            info!("Notifications disabled for {}", name);
        }
        Ok(())
    }

    async fn monitor(
        &mut self,
        peripheral: &Peripheral,
        brake: Option<Characteristic>,
    ) -> Result<()> {
        let mut notifications = peripheral.notifications().await?;
        let mut frame_count = 0u64;

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        return Err(anyhow!("Command channel closed"));
                    };
                    self.write_command(peripheral, brake.as_ref(), command).await;
                }
                result = timeout(NOTIFICATION_TIMEOUT, notifications.next()) => {
                    let notification = match result {
                        Ok(Some(notification)) => notification,
                        Ok(None) => {
                            info!("Notification stream ended");
                            return Err(anyhow!("Notification stream closed"));
                        }
                        Err(_) => {
                            warn!(
                                "No notifications received for {} seconds, assuming connection lost",
                                NOTIFICATION_TIMEOUT.as_secs()
                            );
                            return Err(anyhow!("Notification timeout"));
                        }
                    };

                    let sensor_config = *self.sensor_config.read().await;
                    match self.session.on_characteristic_frame(
                        notification.uuid,
                        &notification.value,
                        &sensor_config,
                    ) {
                        Ok(event) => {
                            frame_count += 1;
                            if frame_count % 60 == 0 {
                                info!("Decoded {} frames", frame_count);
                            }
                            self.emit(event).await;
                        }
                        Err(SessionError::BadFrame(e)) => {
                            warn!("Dropped malformed frame from {}: {}", notification.uuid, e);
                        }
                        Err(SessionError::NotConnected) => {
                            return Err(anyhow!("Frame received while not connected"));
                        }
                    }
                }
            }
        }
    }

    /// Encode and write one resistance command to the trainer brake.
    /// Fire-and-forget: failures are logged, never retried here.
    async fn write_command(
        &self,
        peripheral: &Peripheral,
        brake: Option<&Characteristic>,
        command: ResistanceCommand,
    ) {
        let Some(brake) = brake else {
            warn!(
                "Ignoring resistance command {:?}: device has no trainer brake characteristic",
                command
            );
            return;
        };

        let sensor_config = *self.sensor_config.read().await;
        match self.session.encode_command(command, &sensor_config) {
            Ok(bytes) => {
                match peripheral.write(brake, &bytes, WriteType::WithResponse).await {
                    Ok(_) => info!("Sent resistance command {:?} as {:02X?}", command, bytes),
                    Err(e) => error!("Failed to write resistance command: {}", e),
                }
            }
            Err(e) => warn!("Resistance command rejected: {}", e),
        }
    }
}
