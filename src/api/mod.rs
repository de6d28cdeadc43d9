use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::bluetooth::control::ResistanceCommand;
use crate::bluetooth::session::ConnectionState;
use crate::config::SensorConfig;
use crate::websocket::WsMessage;

// Validation bounds for settings updates. Circumferences outside this range
// are not plausible bicycle wheels.
const MIN_WHEEL_CIRCUMFERENCE_MM: u32 = 500;
const MAX_WHEEL_CIRCUMFERENCE_MM: u32 = 4000;

#[derive(Clone)]
pub struct AppState {
    pub sensor_config: Arc<RwLock<SensorConfig>>,
    pub connection: Arc<RwLock<ConnectionState>>,
    pub ws_tx: broadcast::Sender<WsMessage>,
    pub command_tx: mpsc::Sender<ResistanceCommand>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/trainer", post(post_trainer_command))
        .route("/ws/live", get(crate::websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "server_time": Utc::now().to_rfc3339(),
    }))
}

// Current connection state
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let connection = *state.connection.read().await;
    Json(serde_json::json!({
        "connection": connection,
        "server_time": Utc::now().to_rfc3339(),
    }))
}

// Read the sensor settings
async fn get_settings(State(state): State<AppState>) -> Json<SensorConfig> {
    Json(*state.sensor_config.read().await)
}

// Replace the sensor settings. The next decoded frame and the next encoded
// command see the new values.
async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<SensorConfig>,
) -> Result<Json<SensorConfig>, ApiError> {
    if settings.wheel_circumference_mm < MIN_WHEEL_CIRCUMFERENCE_MM
        || settings.wheel_circumference_mm > MAX_WHEEL_CIRCUMFERENCE_MM
    {
        return Err(ApiError::Validation(format!(
            "wheel_circumference_mm must be between {} and {}",
            MIN_WHEEL_CIRCUMFERENCE_MM, MAX_WHEEL_CIRCUMFERENCE_MM
        )));
    }
    if settings.max_power_level == 0 {
        return Err(ApiError::Validation(
            "max_power_level must be positive".to_string(),
        ));
    }

    info!(
        "Updating settings: wheel_circumference_mm={}, max_power_level={}",
        settings.wheel_circumference_mm, settings.max_power_level
    );
    *state.sensor_config.write().await = settings;

    Ok(Json(settings))
}

// Submit a resistance command for the trainer
async fn post_trainer_command(
    State(state): State<AppState>,
    Json(command): Json<ResistanceCommand>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if *state.connection.read().await != ConnectionState::Connected {
        return Err(ApiError::NotConnected);
    }

    info!("Queueing resistance command: {:?}", command);
    state
        .command_tx
        .send(command)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Command queue closed: {}", e)))?;

    Ok(Json(serde_json::json!({ "queued": true })))
}

// Error handling
#[derive(Debug)]
enum ApiError {
    Validation(String),
    NotConnected,
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::Validation(msg) => {
                warn!("Validation error: {}", msg);
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": msg
                    })),
                )
                    .into_response()
            }
            ApiError::NotConnected => {
                warn!("Rejected request: no sensor connected");
                (
                    StatusCode::CONFLICT,
                    Json(serde_json::json!({
                        "error": "device is not connected"
                    })),
                )
                    .into_response()
            }
            ApiError::Internal(e) => {
                error!("Internal server error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "error": "Internal server error"
                    })),
                )
                    .into_response()
            }
        }
    }
}
