use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Persisted recording configuration
        .route("/config", get(handlers::get_config).put(handlers::update_config))
        // Per-tab recording control
        .route("/tabs/:tab_id/recording", get(handlers::get_recording_state))
        .route("/tabs/:tab_id/recording/start", post(handlers::start_recording))
        .route("/tabs/:tab_id/recording/stop", post(handlers::stop_recording))
        .route("/tabs/:tab_id/screenshot", post(handlers::take_screenshot))
        // Request logging, then CORS for browser-side control pages
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
