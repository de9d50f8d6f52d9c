pub mod api;
pub mod auth;
pub mod routes;
pub mod sse;
pub mod state;

use axum::routing::{get, put};
use axum::Router;
use tower_http::services::ServeDir;

use state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::dashboard))
        .route("/sse", get(sse::sse_handler))
        .route("/api/health", get(api::health))
        .route("/api/stats", get(api::stats))
        .route("/api/comments/undefined", get(api::undefined_comments))
        .route("/api/comments/{id}", get(api::get_comment))
        .route("/api/comments/{id}/sentiment", put(api::update_sentiment))
        .nest_service("/static", ServeDir::new("templates/static"))
        .with_state(state)
}
