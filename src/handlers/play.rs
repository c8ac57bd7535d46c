// src/handlers/play.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::answer::SubmitAnswerRequest,
    services::orchestrator::Orchestrator,
    utils::jwt::Claims,
};

pub async fn start_session(
    State(orchestrator): State<Orchestrator>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let requester = claims.requester()?;
    let session = orchestrator.start_session(id, requester).await?;
    Ok(Json(session))
}

pub async fn stop_session(
    State(orchestrator): State<Orchestrator>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let requester = claims.requester()?;
    let session = orchestrator.stop_session(id, requester).await?;
    Ok(Json(session))
}

/// Submits an answer for the caller.
///
/// A repeated live answer is not an error: the response reports `already_answered`.
pub async fn submit_answer(
    State(orchestrator): State<Orchestrator>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let requester = claims.requester()?;
    let receipt = orchestrator.record_answer(id, requester.id, payload).await?;
    Ok(Json(receipt))
}

/// Exam only: the caller hands in early.
pub async fn finalize(
    State(orchestrator): State<Orchestrator>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let requester = claims.requester()?;
    let outcome = orchestrator.finalize_participant(id, requester.id).await?;
    Ok(Json(outcome))
}

pub async fn leave(
    State(orchestrator): State<Orchestrator>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let requester = claims.requester()?;
    orchestrator.leave_session(id, requester.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_ranking(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let session = orchestrator.registry().get(id).await?;
    let ranking = orchestrator.tracker().ranking(id, session.mode).await?;
    Ok(Json(ranking))
}

/// The caller's own participation, answers included.
pub async fn my_participation(
    State(orchestrator): State<Orchestrator>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let requester = claims.requester()?;
    let participation = orchestrator
        .tracker()
        .participation(id, requester.id)
        .await?;
    Ok(Json(participation))
}

/// Exam only: every question of the running exam, without answers.
pub async fn exam_paper(
    State(orchestrator): State<Orchestrator>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let requester = claims.requester()?;
    let paper = orchestrator.exam_paper(id, requester.id).await?;
    Ok(Json(paper))
}
