// src/routes.rs

use axum::{
    Router,
    http::Method,
    middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{play, rooms, sessions},
    state::AppState,
    utils::jwt::auth_middleware,
};

/// Assembles the main application router.
///
/// * Session lifecycle and play routes require a bearer token.
/// * Room event streams are public; they only carry sanitized broadcasts.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let session_routes = Router::new()
        .route(
            "/",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route("/join", post(sessions::join_session))
        .route("/code/{code}", get(sessions::get_session_by_code))
        .route(
            "/{id}",
            get(sessions::get_session)
                .put(sessions::update_session)
                .delete(sessions::delete_session),
        )
        .route("/{id}/start", post(play::start_session))
        .route("/{id}/stop", post(play::stop_session))
        .route("/{id}/answers", post(play::submit_answer))
        .route("/{id}/finalize", post(play::finalize))
        .route("/{id}/leave", post(play::leave))
        .route("/{id}/ranking", get(play::get_ranking))
        .route("/{id}/participation", get(play::my_participation))
        .route("/{id}/paper", get(play::exam_paper))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let room_routes = Router::new().route("/{code}/events", get(rooms::room_events));

    Router::new()
        .nest("/api/sessions", session_routes)
        .nest("/api/rooms", room_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
