//! Router definition

use axum::{extract::DefaultBodyLimit, routing::*, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{handlers, AppState};

/// Create the session router
pub fn create_router(state: &AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route(
            "/sessions/:session",
            get(handlers::session_status).delete(handlers::delete_session),
        )
        .route(
            "/sessions/:session/upload",
            put(handlers::upload_raw).post(handlers::upload_form),
        )
        .route("/sessions/:session/generate", post(handlers::generate))
        .route("/sessions/:session/original", get(handlers::get_original))
        .route("/sessions/:session/generated", get(handlers::get_generated))
        .route("/sessions/:session/delete", post(handlers::delete_session))
        .route("/sessions/:session/images", get(handlers::list_images))
        .route("/results/*key", get(handlers::get_result))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
