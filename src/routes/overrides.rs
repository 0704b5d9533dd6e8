//! Override CRUD and bulk endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::models::{BulkUpdateRequest, OverrideError, OverridePatch};
use crate::routes::{api_error, ApiError};
use crate::AppState;

pub(crate) fn override_error(err: OverrideError) -> ApiError {
    match err {
        OverrideError::InvalidContentId(_) | OverrideError::InvalidValue { .. } => {
            api_error(StatusCode::BAD_REQUEST, err.to_string())
        }
        OverrideError::BulkRolledBack {
            failed,
            total,
            result,
        } => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": format!("Atomic bulk update rolled back: {} of {} ids failed", failed, total),
                "result": result,
            })),
        ),
        OverrideError::Store(e) => {
            tracing::error!("Override store error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Override store error")
        }
    }
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, rejection.body_text())
}

/// GET /api/overrides - Every stored patch by content id
pub async fn list_overrides(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let patches = state.overrides.list().await.map_err(override_error)?;
    Ok(Json(patches))
}

/// GET /api/overrides/:content_id
pub async fn get_override(
    State(state): State<Arc<AppState>>,
    Path(content_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let patch = state
        .overrides
        .get(&content_id)
        .await
        .map_err(override_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Override not found"))?;

    Ok(Json(patch))
}

/// PUT|PATCH /api/overrides/:content_id - Merge the submitted fields
pub async fn set_override(
    State(state): State<Arc<AppState>>,
    Path(content_id): Path<String>,
    payload: Result<Json<OverridePatch>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(patch) = payload.map_err(bad_body)?;
    if patch.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Patch has no fields"));
    }

    let stored = state
        .overrides
        .set(&content_id, patch)
        .await
        .map_err(override_error)?;

    tracing::info!("Override saved for {}", content_id);
    Ok(Json(stored))
}

/// DELETE /api/overrides/:content_id
pub async fn delete_override(
    State(state): State<Arc<AppState>>,
    Path(content_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .overrides
        .delete(&content_id)
        .await
        .map_err(override_error)?;

    if !deleted {
        return Err(api_error(StatusCode::NOT_FOUND, "Override not found"));
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "contentId": content_id,
    })))
}

/// POST /api/overrides/bulk - One field, many ids
pub async fn bulk_update(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BulkUpdateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(bad_body)?;

    let result = state
        .overrides
        .bulk_update(&request.ids, request.field, &request.value, request.atomic)
        .await
        .map_err(override_error)?;

    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::router;
    use crate::routes::test_support::{state, GOOD};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_override_lifecycle() {
        let app = router(state(true));
        let uri = format!("/api/overrides/{}", GOOD);

        let (status, body) = call(&app, "PUT", &uri, Some(json!({ "enabled": false }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "enabled": false }));

        let (status, body) = call(&app, "PATCH", &uri, Some(json!({ "groupLabel": "Kids" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "enabled": false, "groupLabel": "Kids" }));

        let (status, _) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_content_id_is_bad_request() {
        let app = router(state(true));

        let (status, body) =
            call(&app, "PUT", "/api/overrides/not-a-hash", Some(json!({ "enabled": true }))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid content id"));
    }

    #[tokio::test]
    async fn test_disabled_override_hides_entry_from_playlist() {
        let state = state(true);
        let app = router(state.clone());
        let uri = format!("/api/overrides/{}", GOOD);
        call(&app, "PUT", &uri, Some(json!({ "enabled": false }))).await;

        let text = state.catalog.render_playlist(None).await.unwrap();
        assert!(!text.contains(GOOD));

        let (_, channels) = call(&app, "GET", "/api/channels", None).await;
        let news = &channels["channels"][0];
        assert_eq!(news["streams"][0]["enabled"], false);
        assert_eq!(news["streams"][0]["hasOverride"], true);
    }

    #[tokio::test]
    async fn test_bulk_partial_and_atomic() {
        let app = router(state(true));

        let (status, body) = call(
            &app,
            "POST",
            "/api/overrides/bulk",
            Some(json!({ "ids": [GOOD, "bad"], "field": "groupLabel", "value": "Misc" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], 1);
        assert_eq!(body["failed"], 1);
        assert!(body["errors"]["bad"].is_string());

        let (status, body) = call(
            &app,
            "POST",
            "/api/overrides/bulk",
            Some(json!({ "ids": [GOOD, "bad"], "field": "enabled", "value": false, "atomic": true })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["result"]["failed"], 1);

        // Rolled back: GOOD keeps its earlier state
        let (_, stored) = call(&app, "GET", &format!("/api/overrides/{}", GOOD), None).await;
        assert_eq!(stored, json!({ "groupLabel": "Misc" }));
    }

    #[tokio::test]
    async fn test_bulk_unknown_field_rejects_whole_call() {
        let app = router(state(true));

        let (status, _) = call(
            &app,
            "POST",
            "/api/overrides/bulk",
            Some(json!({ "ids": [GOOD], "field": "color", "value": "red" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, all) = call(&app, "GET", "/api/overrides", None).await;
        assert_eq!(all, json!({}));
    }
}
