pub mod channels;
pub mod health;
pub mod overrides;
pub mod stream;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::AppState;

/// Error half of every JSON handler result
pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

/// Build the HTTP surface
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // Catalog
        .route("/api/channels", get(channels::list_channels))
        .route("/playlist.m3u", get(channels::playlist))
        // Overrides
        .route("/api/overrides", get(overrides::list_overrides))
        .route("/api/overrides/bulk", post(overrides::bulk_update))
        .route(
            "/api/overrides/:content_id",
            get(overrides::get_override)
                .put(overrides::set_override)
                .patch(overrides::set_override)
                .delete(overrides::delete_override),
        )
        // Engine
        .route("/api/engine/stats/:session_id", get(stream::engine_stats))
        .route("/api/engine/ping", get(stream::engine_ping))
        // Compression would buffer the media stream
        .layer(CompressionLayer::new());

    Router::new()
        // Health endpoints
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/ready", get(health::ready))
        .route("/live", get(health::live))
        // Playback relay
        .route("/stream", get(stream::stream))
        .merge(api)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
