//! Playback relay and engine passthrough endpoints

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::models::StreamQuery;
use crate::routes::{api_error, ApiError};
use crate::services::engine::EngineError;
use crate::services::m3u_parser::is_valid_content_id;
use crate::services::relay::RelayError;
use crate::AppState;

const MEDIA_CONTENT_TYPE: &str = "video/mp2t";
const SESSION_HEADER: &str = "x-session-id";

fn relay_error(err: RelayError) -> ApiError {
    let status = if err.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::BAD_GATEWAY
    };
    api_error(status, err.to_string())
}

fn engine_error(err: EngineError) -> ApiError {
    let status = match &err {
        EngineError::UnknownSession(_) => StatusCode::NOT_FOUND,
        e if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    api_error(status, err.to_string())
}

/// GET /stream?id=&transcode_audio= - Start the engine and relay its bytes.
///
/// The engine is started before responding so start failures still get a
/// proper status. Dropping the response body cancels the relay.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let info_hash = query.id.trim().to_ascii_lowercase();
    if !is_valid_content_id(&info_hash) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid content id"));
    }

    let transcode_audio = query
        .transcode_audio
        .filter(|v| !v.trim().is_empty())
        .or_else(|| state.config.transcode_audio.clone());

    let active = state
        .proxy
        .begin(&info_hash, transcode_audio)
        .await
        .map_err(relay_error)?;
    let session_id = active.session.session_id.clone();

    let (sink, reader) = tokio::io::duplex(state.config.relay_buffer_bytes.max(1));
    let cancel = CancellationToken::new();

    let relay_state = state.clone();
    let relay_cancel = cancel.clone();
    tokio::spawn(async move {
        // Failures are logged and counted by the proxy itself
        if let Ok(report) = relay_state.proxy.relay(active, sink, relay_cancel).await {
            tracing::debug!(
                session_id = %report.session_id,
                info_hash = %report.info_hash,
                bytes = report.bytes_relayed,
                outcome = ?report.outcome,
                "Relay task done"
            );
        }
    });

    let guard = cancel.drop_guard();
    let mut chunks = ReaderStream::new(reader);
    let body = async_stream::stream! {
        let _guard = guard;
        while let Some(chunk) = chunks.next().await {
            yield chunk;
        }
    };

    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(MEDIA_CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        headers.insert(SESSION_HEADER, value);
    }

    Ok(response)
}

/// GET /api/engine/stats/:session_id - Swarm statistics for a session
pub async fn engine_stats(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.engine.stats(&session_id).await.map_err(engine_error)?;
    Ok(Json(stats))
}

/// GET /api/engine/ping - Is the engine reachable
pub async fn engine_ping(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.engine.ping().await {
        Ok(version) => (
            StatusCode::OK,
            Json(serde_json::json!({ "reachable": true, "version": version })),
        ),
        Err(e) => {
            tracing::warn!("Engine ping failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "reachable": false, "error": e.to_string() })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::router;
    use crate::routes::test_support::{state, GOOD, MEDIA, REJECTED, SLOW_START};
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get(uri: &str) -> Response {
        router(state(true))
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_stream_relays_engine_bytes() {
        let resp = get(&format!("/stream?id={}", GOOD.to_uppercase())).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], MEDIA_CONTENT_TYPE);
        assert!(resp.headers().contains_key(SESSION_HEADER));
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], MEDIA);
    }

    #[tokio::test]
    async fn test_invalid_id_is_bad_request() {
        let resp = get("/stream?id=abc").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_engine_rejection_is_bad_gateway() {
        let resp = get(&format!("/stream?id={}", REJECTED)).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_engine_start_timeout_is_gateway_timeout() {
        let resp = get(&format!("/stream?id={}", SLOW_START)).await;
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_stats_for_unknown_session_is_not_found() {
        let resp = get("/api/engine/stats/nope").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = get("/api/engine/stats/live-session").await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ping_reports_version() {
        let resp = get("/api/engine/ping").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["version"], "test-engine");
    }
}
