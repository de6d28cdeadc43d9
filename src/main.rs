mod api;
mod bluetooth;
mod config;
mod websocket;

use anyhow::Result;
use std::sync::Arc;
use tokio::{
    signal,
    sync::{broadcast, RwLock},
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{create_router, AppState};
use bluetooth::session::ConnectionState;
use bluetooth::SensorBridge;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "velo_sync=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚴 Starting Velo Sync Service");

    // Load configuration (file -> env vars -> defaults)
    let config = Config::load("config.toml");
    info!(
        "Configuration: port={}, device_filter='{}', wheel_circumference={}mm, max_power_level={}",
        config.server.port,
        config.bluetooth.device_name_filter,
        config.sensor.wheel_circumference_mm,
        config.sensor.max_power_level
    );

    // Runtime-mutable sensor settings, shared between the decoder and the
    // settings API
    let sensor_config = Arc::new(RwLock::new(config.sensor));

    // Shared connection state for the status API
    let connection = Arc::new(RwLock::new(ConnectionState::Disconnected));

    // Broadcast channel fanning decoded telemetry out to WebSocket clients
    let (ws_tx, _) = broadcast::channel(100);

    // Bluetooth bridge: scan, connect, decode, reconnect
    let (bridge, command_tx) = SensorBridge::new(
        config.bluetooth.clone(),
        Arc::clone(&sensor_config),
        Arc::clone(&connection),
        ws_tx.clone(),
    );
    let bridge_handle = tokio::spawn(async move {
        if let Err(e) = bridge.run().await {
            error!("Sensor bridge error: {}", e);
        }
    });

    // HTTP/WebSocket server
    let app = create_router(AppState {
        sensor_config: Arc::clone(&sensor_config),
        connection: Arc::clone(&connection),
        ws_tx: ws_tx.clone(),
        command_tx,
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("🌐 Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!("Server error: {}", e);
        }
    });

    info!("✨ Velo Sync Service is running!");
    info!(
        "📈 API: http://{}:{}/api/health",
        config.server.host, config.server.port
    );
    info!(
        "🔌 WebSocket: ws://{}:{}/ws/live",
        config.server.host, config.server.port
    );
    info!("⏹️  Press Ctrl+C to stop");

    tokio::select! {
        _ = bridge_handle => {
            info!("Sensor bridge task completed");
        }
        _ = server_handle => {
            info!("Server task completed");
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully");
        }
    }

    info!("👋 Velo Sync Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
