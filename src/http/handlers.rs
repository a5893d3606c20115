use super::state::AppState;
use crate::session::{ConnectionState, RoleConfig, SessionError, SessionStatus};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub connection_state: ConnectionState,
    pub volume: f32,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_response(state: &AppState) -> StatusResponse {
    let SessionStatus {
        connection_state,
        error,
    } = state.controller.status();

    StatusResponse {
        connection_state,
        volume: state.controller.volume(),
        error,
    }
}

fn error_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::Permission(_) => StatusCode::FORBIDDEN,
        SessionError::Transport(_) => StatusCode::BAD_GATEWAY,
        SessionError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Cancelled => StatusCode::CONFLICT,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/connect
/// Start an interview session for a role, replacing any current one
pub async fn connect(
    State(state): State<AppState>,
    Json(role): Json<RoleConfig>,
) -> impl IntoResponse {
    if role.role.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "role must not be empty".to_string(),
            }),
        )
            .into_response();
    }

    info!("Connect requested for role: {} ({})", role.role, role.level);

    match state.controller.connect(role).await {
        Ok(()) => (StatusCode::OK, Json(status_response(&state))).into_response(),
        Err(e) => {
            warn!("Connect failed: {}", e);
            (error_status(&e), Json(status_response(&state))).into_response()
        }
    }
}

/// POST /session/disconnect
pub async fn disconnect(State(state): State<AppState>) -> impl IntoResponse {
    state.controller.disconnect().await;
    (StatusCode::OK, Json(status_response(&state)))
}

/// POST /session/text
/// Send a typed message to the interviewer
pub async fn send_text(
    State(state): State<AppState>,
    Json(req): Json<SendTextRequest>,
) -> impl IntoResponse {
    if req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "text must not be empty".to_string(),
            }),
        )
            .into_response();
    }

    if state.controller.send_text(req.text).await {
        StatusCode::ACCEPTED.into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!(
                    "Session is {}, text was not sent",
                    state.controller.connection_state()
                ),
            }),
        )
            .into_response()
    }
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(status_response(&state)))
}

/// GET /session/transcript
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.controller.transcript().await))
}

/// GET /session/stats
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.controller.stats().await))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
