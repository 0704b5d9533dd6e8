//! Catalog endpoints: JSON channel listing and the rewritten M3U playlist

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::ChannelFilter;
use crate::routes::{api_error, overrides::override_error, ApiError};
use crate::services::catalog::IngestError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PlaylistQuery {
    #[serde(default)]
    pub transcode_audio: Option<String>,
}

pub(crate) fn ingest_error(err: IngestError) -> ApiError {
    match err {
        IngestError::AllSourcesUnavailable { .. } => {
            tracing::error!("{}", err);
            api_error(StatusCode::BAD_GATEWAY, err.to_string())
        }
        IngestError::Overrides(e) => override_error(e),
    }
}

/// GET /api/channels?name=&group= - Aggregated channel catalog
pub async fn list_channels(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ChannelFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .catalog
        .list_channels(&filter)
        .await
        .map_err(ingest_error)?;

    Ok(Json(response))
}

/// GET /playlist.m3u - Merged playlist pointing at /stream
pub async fn playlist(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlaylistQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .catalog
        .render_playlist(query.transcode_audio)
        .await
        .map_err(ingest_error)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/x-mpegurl; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    ))
}
