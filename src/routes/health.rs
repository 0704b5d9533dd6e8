use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Root endpoint - basic status
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "AceStream Proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "runtime": "rust"
    }))
}

/// Engine reachability
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EngineHealth {
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

/// Override store state
#[derive(Serialize)]
struct StoreHealth {
    backend: &'static str,
    healthy: bool,
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    uptime: u64,
    sources: usize,
    engine: EngineHealth,
    override_store: StoreHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    redis: Option<bool>,
}

async fn redis_ok(state: &AppState) -> Option<bool> {
    match &state.redis {
        Some(redis) => Some(redis.ping().await.unwrap_or(false)),
        None => None,
    }
}

/// GET /health - Advanced health check
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();

    // Engine down only affects playback, catalog reads keep working
    let engine = match state.engine.ping().await {
        Ok(version) => EngineHealth {
            reachable: true,
            version: Some(version),
        },
        Err(e) => {
            tracing::warn!("Engine health check failed: {}", e);
            EngineHealth {
                reachable: false,
                version: None,
            }
        }
    };

    let store_ok = state.overrides.is_healthy().await;
    let redis = redis_ok(&state).await;

    let status = if !store_ok {
        "unhealthy"
    } else if engine.reachable && redis != Some(false) {
        "ok"
    } else {
        "degraded"
    };

    let health = HealthResponse {
        status: status.to_string(),
        uptime,
        sources: state.catalog.source_count(),
        engine,
        override_store: StoreHealth {
            backend: state.overrides.backend(),
            healthy: store_ok,
        },
        redis,
    };

    Json(health)
}

/// GET /metrics - Prometheus metrics
pub async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                b"Internal Server Error".to_vec(),
            )
        }
    }
}

/// Readiness probe (for Kubernetes)
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // The override store gates every read path
    let store_ok = state.overrides.is_healthy().await;
    let engine_ok = state.engine.ping().await.is_ok();

    if store_ok && engine_ok {
        (StatusCode::OK, "ready")
    } else if store_ok {
        (StatusCode::OK, "ready (engine unreachable)")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready - override store unavailable")
    }
}

/// Liveness probe (for Kubernetes)
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::router;
    use crate::routes::test_support::state;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_components() {
        let resp = router(state(true))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["engine"]["version"], "test-engine");
        assert_eq!(json["overrideStore"]["backend"], "memory");
        assert!(json.get("redis").is_none());
    }

    #[tokio::test]
    async fn test_probes() {
        let app = router(state(true));

        let live = app
            .clone()
            .oneshot(Request::get("/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(live.status(), StatusCode::OK);

        let ready = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let resp = router(state(true))
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
