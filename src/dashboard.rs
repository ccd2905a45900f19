use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use crate::clients::ntrip::{rtk_presets, NtripConfig, RtkPreset};
use crate::clients::survive::SurviveConfig;
use crate::clients::ClientStatus;
use crate::error::GatewayError;
use crate::gateway::{BatteryDebug, Gateway, GatewayStatus};
use crate::live_status::SensorData;
use crate::session::LogStatus;
use crate::types::{OrientationOffsets, Stats};

/// A subscriber whose socket write stalls this long is dropped
const WS_SEND_TIMEOUT: Duration = Duration::from_secs(2);

pub type AppState = Arc<Gateway>;

/// Maps the error taxonomy onto HTTP status codes
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::InvalidInput(_) | GatewayError::Json(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InvalidState(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("[HTTP] {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(GatewayError::InvalidInput(format!("invalid request body: {}", e))))
}

pub fn router(gateway: AppState) -> Router {
    Router::new()
        .route("/data", get(data_handler))
        .route("/ws", get(ws_handler))
        .route("/ws/logs", get(ws_logs_handler))
        .route("/api/status", get(status_handler))
        .route("/api/version", get(version_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/battery-debug", get(battery_debug_handler))
        .route(
            "/api/orientation-offset",
            get(get_orientation_offset).post(set_orientation_offset),
        )
        .route("/api/yaw-offset", get(get_yaw_offset).post(set_yaw_offset))
        .route("/api/rtk-config", get(get_rtk_config).post(set_rtk_config))
        .route("/api/rtk-status", get(rtk_status))
        .route("/api/rtk-presets", get(rtk_presets_handler))
        .route(
            "/api/survive-config",
            get(get_survive_config).post(set_survive_config),
        )
        .route("/api/survive-status", get(survive_status))
        .route("/api/log/start", post(log_start))
        .route("/api/log/stop", post(log_stop))
        .route("/api/log/pause", post(log_pause))
        .route("/api/log/resume", post(log_resume))
        .route("/api/log/status", get(log_status))
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

async fn data_handler(State(gw): State<AppState>) -> ApiResult<SensorData> {
    Ok(Json(gw.snapshot()?))
}

async fn status_handler(State(gw): State<AppState>) -> Json<GatewayStatus> {
    Json(gw.status())
}

async fn version_handler() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn stats_handler(State(gw): State<AppState>) -> Json<Stats> {
    Json(gw.state.stats.get())
}

async fn battery_debug_handler(State(gw): State<AppState>) -> ApiResult<BatteryDebug> {
    Ok(Json(gw.battery_debug()?))
}

// ─── Orientation offsets ─────────────────────────────────────────────────────

async fn get_orientation_offset(State(gw): State<AppState>) -> Json<OrientationOffsets> {
    Json(gw.orientation_offsets())
}

async fn set_orientation_offset(
    State(gw): State<AppState>,
    body: Bytes,
) -> ApiResult<OrientationOffsets> {
    let offsets: OrientationOffsets = parse_body(&body)?;
    Ok(Json(gw.set_orientation_offsets(offsets)?))
}

#[derive(Serialize, Deserialize)]
struct YawOffset {
    yaw_offset: i32,
}

async fn get_yaw_offset(State(gw): State<AppState>) -> Json<YawOffset> {
    Json(YawOffset {
        yaw_offset: gw.orientation_offsets().yaw.round() as i32,
    })
}

async fn set_yaw_offset(State(gw): State<AppState>, body: Bytes) -> ApiResult<YawOffset> {
    let request: YawOffset = parse_body(&body)?;
    let offsets = gw.set_yaw_offset(request.yaw_offset as f64)?;
    Ok(Json(YawOffset {
        yaw_offset: offsets.yaw.round() as i32,
    }))
}

// ─── Reconnecting clients ────────────────────────────────────────────────────

async fn get_rtk_config(State(gw): State<AppState>) -> Json<NtripConfig> {
    Json(gw.rtk_config())
}

async fn set_rtk_config(
    State(gw): State<AppState>,
    body: Bytes,
) -> ApiResult<ClientStatus<NtripConfig>> {
    let config: NtripConfig = parse_body(&body)?;
    Ok(Json(gw.update_rtk_config(config)?))
}

async fn rtk_status(State(gw): State<AppState>) -> Json<ClientStatus<NtripConfig>> {
    Json(gw.rtk.status())
}

async fn rtk_presets_handler() -> Json<Vec<RtkPreset>> {
    Json(rtk_presets())
}

async fn get_survive_config(State(gw): State<AppState>) -> Json<SurviveConfig> {
    Json(gw.survive_config())
}

async fn set_survive_config(
    State(gw): State<AppState>,
    body: Bytes,
) -> ApiResult<ClientStatus<SurviveConfig>> {
    let config: SurviveConfig = parse_body(&body)?;
    Ok(Json(gw.update_survive_config(config)?))
}

async fn survive_status(State(gw): State<AppState>) -> Json<ClientStatus<SurviveConfig>> {
    Json(gw.survive.status())
}

// ─── Log session ─────────────────────────────────────────────────────────────

async fn log_start(State(gw): State<AppState>) -> ApiResult<LogStatus> {
    Ok(Json(gw.start_log()?))
}

async fn log_stop(State(gw): State<AppState>) -> ApiResult<LogStatus> {
    Ok(Json(gw.stop_log()?))
}

async fn log_pause(State(gw): State<AppState>) -> ApiResult<LogStatus> {
    Ok(Json(gw.pause_log()?))
}

async fn log_resume(State(gw): State<AppState>) -> ApiResult<LogStatus> {
    Ok(Json(gw.resume_log()?))
}

async fn log_status(State(gw): State<AppState>) -> Json<LogStatus> {
    Json(gw.log_status())
}

// ─── WebSocket ───────────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(gw): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gw))
}

async fn send_text(socket: &mut WebSocket, text: String) -> bool {
    matches!(
        tokio::time::timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(text))).await,
        Ok(Ok(()))
    )
}

/// Forward broadcast frames out and accept command frames in.
async fn handle_socket(mut socket: WebSocket, gw: AppState) {
    let (id, mut outbound) = gw.registry.register();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                // None: the broadcaster dropped us as a stalled subscriber
                let Some(frame) = frame else { break };
                if !send_text(&mut socket, frame.to_string()).await {
                    break;
                }
            }
            inbound = socket.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let response = gw.handle_command(&text);
                        let Ok(json) = serde_json::to_string(&response) else { continue };
                        if !send_text(&mut socket, json).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("[WS] Client {} error: {}", id, e);
                        break;
                    }
                }
            }
        }
    }

    gw.registry.unregister(id);
}

async fn ws_logs_handler(ws: WebSocketUpgrade, State(gw): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_log_socket(socket, gw))
}

/// Forward gateway events; inbound frames other than close are ignored.
async fn handle_log_socket(mut socket: WebSocket, gw: AppState) {
    let (id, mut outbound) = gw.log_events.register();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if !send_text(&mut socket, frame.to_string()).await {
                    break;
                }
            }
            inbound = socket.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    gw.log_events.unregister(id);
}
