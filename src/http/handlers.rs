use super::state::AppState;
use crate::control::{Affordance, ControlError};
use crate::host::TabId;
use crate::session::RecordingConfig;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStateResponse {
    pub tab_id: TabId,
    pub recording: bool,
    pub affordance: Affordance,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingResponse {
    pub tab_id: TabId,
    pub recorder_tab_id: TabId,
    pub recording_id: uuid::Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRecordingResponse {
    pub tab_id: TabId,
    pub recording: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotResponse {
    pub data_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(e: ControlError) -> Response {
    let status = match &e {
        ControlError::AlreadyRecording(_) => StatusCode::CONFLICT,
        ControlError::Screenshot(_) => StatusCode::BAD_GATEWAY,
        ControlError::Bus(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("{}", e);
    }

    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /tabs/:tab_id/recording
/// Recording flag of a tab and the affordance to render for it
pub async fn get_recording_state(
    State(state): State<AppState>,
    Path(tab_id): Path<u32>,
) -> Response {
    let tab = TabId(tab_id);
    match state.control.recording_state(tab).await {
        Ok(recording) => Json(RecordingStateResponse {
            tab_id: tab,
            recording,
            affordance: Affordance::for_state(recording),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /tabs/:tab_id/recording/start
/// Start a new recording session for a tab
pub async fn start_recording(State(state): State<AppState>, Path(tab_id): Path<u32>) -> Response {
    let tab = TabId(tab_id);
    info!("Start requested for tab {}", tab);

    match state.control.start(tab).await {
        Ok(started) => (
            StatusCode::OK,
            Json(StartRecordingResponse {
                tab_id: started.target_tab,
                recorder_tab_id: started.recorder_tab,
                recording_id: started.descriptor.recording_id,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /tabs/:tab_id/recording/stop
/// Stop recording a tab
pub async fn stop_recording(State(state): State<AppState>, Path(tab_id): Path<u32>) -> Response {
    let tab = TabId(tab_id);
    match state.control.stop(tab).await {
        Ok(recording) => Json(StopRecordingResponse { tab_id: tab, recording }).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /tabs/:tab_id/screenshot
/// Capture a tab right now
pub async fn take_screenshot(State(state): State<AppState>, Path(tab_id): Path<u32>) -> Response {
    match state.control.screenshot(TabId(tab_id)).await {
        Ok(data_url) => Json(ScreenshotResponse { data_url }).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /config
pub async fn get_config(State(state): State<AppState>) -> Response {
    match state.control.config().await {
        Ok(config) => Json(config).into_response(),
        Err(e) => error_response(e),
    }
}

/// PUT /config
/// Missing fields take their defaults
pub async fn update_config(
    State(state): State<AppState>,
    Json(config): Json<RecordingConfig>,
) -> Response {
    let config = config.normalized();
    match state.control.update_config(config.clone()).await {
        Ok(()) => Json(config).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
