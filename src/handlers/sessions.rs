// src/handlers/sessions.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::session::{
        CreateSessionRequest, JoinSessionRequest, ListSessionsQuery, UpdateSessionRequest,
    },
    services::orchestrator::Orchestrator,
    utils::jwt::Claims,
};
use validator::Validate;

/// Creates a session in the `waiting` state. The caller becomes its owner.
pub async fn create_session(
    State(orchestrator): State<Orchestrator>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let requester = claims.requester()?;
    let session = orchestrator.create_session(requester.id, payload).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Lists sessions, optionally filtered by owner and status.
pub async fn list_sessions(
    State(orchestrator): State<Orchestrator>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let sessions = orchestrator.registry().list(&query).await?;
    Ok(Json(sessions))
}

pub async fn get_session(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let session = orchestrator.registry().get(id).await?;
    Ok(Json(session))
}

/// Looks up a joinable session by its code.
pub async fn get_session_by_code(
    State(orchestrator): State<Orchestrator>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = orchestrator.registry().get_by_code(&code).await?;
    Ok(Json(session))
}

/// Edits a session's settings. Rejected once the session has started.
pub async fn update_session(
    State(orchestrator): State<Orchestrator>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let requester = claims.requester()?;
    let session = orchestrator.update_session(id, requester, payload).await?;
    Ok(Json(session))
}

/// Deletes a session and its participations.
pub async fn delete_session(
    State(orchestrator): State<Orchestrator>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let requester = claims.requester()?;
    orchestrator.delete_session(id, requester).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Joins the caller to the session holding the given code.
pub async fn join_session(
    State(orchestrator): State<Orchestrator>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<JoinSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let requester = claims.requester()?;
    let joined = orchestrator
        .registry()
        .join(&payload.join_code, requester.id)
        .await?;
    Ok(Json(joined))
}
