//! HTTP route definitions

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::ParticipantId;
use crate::session::{
    Decision, GameKind, ParticipantStanding, RoundView, SessionError, SessionSummary, SubmitError,
};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sessions", post(create_session_handler))
        .route("/sessions/:session_id", get(session_handler))
        .route(
            "/sessions/:session_id/participants/:participant_id",
            get(view_handler),
        )
        .route(
            "/sessions/:session_id/participants/:participant_id/decision",
            post(decision_handler),
        )
        .route(
            "/sessions/:session_id/participants/:participant_id/results",
            get(results_handler),
        )
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_sessions: usize,
    open_groups: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        active_sessions: state.sessions.active_sessions(),
        open_groups: state.sessions.open_groups(),
    })
}

// ============================================================================
// Session endpoints
// ============================================================================

#[derive(Deserialize)]
struct CreateSessionRequest {
    game: GameKind,
    participants: usize,
    seed: Option<u64>,
}

async fn create_session_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionSummary>), AppError> {
    let Json(req) = payload?;
    let summary = state
        .sessions
        .create_session(req.game, req.participants, req.seed)?;

    Ok((StatusCode::CREATED, Json(summary)))
}

async fn session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(state.sessions.summary(session_id)?))
}

// ============================================================================
// Participant endpoints
// ============================================================================

async fn view_handler(
    State(state): State<AppState>,
    Path((session_id, participant)): Path<(Uuid, ParticipantId)>,
) -> Result<Json<RoundView>, AppError> {
    Ok(Json(state.sessions.participant_view(session_id, participant)?))
}

#[derive(Serialize)]
struct DecisionResponse {
    status: &'static str,
}

async fn decision_handler(
    State(state): State<AppState>,
    Path((session_id, participant)): Path<(Uuid, ParticipantId)>,
    payload: Result<Json<Decision>, JsonRejection>,
) -> Result<(StatusCode, Json<DecisionResponse>), AppError> {
    let Json(decision) = payload?;
    state
        .sessions
        .submit_decision(session_id, participant, decision)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DecisionResponse { status: "accepted" }),
    ))
}

async fn results_handler(
    State(state): State<AppState>,
    Path((session_id, participant)): Path<(Uuid, ParticipantId)>,
) -> Result<Json<ParticipantStanding>, AppError> {
    Ok(Json(state.sessions.participant_results(session_id, participant)?))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::UnknownSession(_) | SessionError::UnknownParticipant { .. } => {
                AppError::NotFound(message)
            }
            SessionError::UnevenGroups { .. }
            | SessionError::NotEnoughParticipants { .. }
            | SessionError::TooManyParticipants { .. } => AppError::BadRequest(message),
            SessionError::NoOpenRound(_) => AppError::Conflict(message),
            SessionError::Submit(submit) => match submit {
                SubmitError::WrongGame { .. }
                | SubmitError::ContributionOutOfBounds { .. }
                | SubmitError::BidOutOfBounds { .. } => AppError::BadRequest(message),
                SubmitError::NotInGroup(_)
                | SubmitError::AlreadySubmitted(_)
                | SubmitError::RoundClosed => AppError::Conflict(message),
            },
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
