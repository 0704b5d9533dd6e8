//! Client for the local peer-swarm engine's HTTP API

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::EngineTimeouts;
use crate::models::{EngineStats, StartedStream, StreamSession};

/// Media bytes coming out of the engine
pub type ByteStream = BoxStream<'static, Result<Bytes, EngineError>>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("engine rejected the request: {0}")]
    Rejected(String),

    #[error("engine transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("engine returned HTTP {0}")]
    HttpStatus(StatusCode),

    #[error("unknown engine session: {0}")]
    UnknownSession(String),

    #[error("unexpected engine response: {0}")]
    Decode(String),
}

impl EngineError {
    pub fn is_timeout(&self) -> bool {
        match self {
            EngineError::Timeout { .. } => true,
            EngineError::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Engine control surface used by the stream proxy and the engine routes
#[async_trait]
pub trait Engine: Send + Sync {
    /// Ask the engine to start playing `session.info_hash`
    async fn start(&self, session: &StreamSession) -> Result<StartedStream, EngineError>;

    /// Open the media byte stream behind a playback URL
    async fn open_stream(&self, playback_url: &str) -> Result<ByteStream, EngineError>;

    async fn stats(&self, session_id: &str) -> Result<EngineStats, EngineError>;

    /// Stop a session. Stopping a session the engine never started is a no-op.
    async fn stop(&self, session_id: &str) -> Result<(), EngineError>;

    /// Health probe, returns the engine version
    async fn ping(&self) -> Result<String, EngineError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartPayload {
    playback_url: String,
    #[serde(default)]
    stat_url: Option<String>,
    #[serde(default)]
    command_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatsPayload {
    status: String,
    peers: u32,
    speed_down: u64,
    speed_up: u64,
    downloaded: u64,
    uploaded: u64,
}

impl From<StatsPayload> for EngineStats {
    fn from(p: StatsPayload) -> Self {
        EngineStats {
            status: p.status,
            peers: p.peers,
            down_speed: p.speed_down,
            up_speed: p.speed_up,
            downloaded: p.downloaded,
            uploaded: p.uploaded,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VersionEnvelope {
    result: Option<VersionPayload>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionPayload {
    #[serde(default)]
    version: Option<String>,
}

/// Run `fut` under `after`, mapping an elapsed deadline to [`EngineError::Timeout`]
async fn with_timeout<T, F>(op: &'static str, after: Duration, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.is_timeout() => Err(EngineError::Timeout { op, after }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(EngineError::Timeout { op, after }),
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, EngineError> {
    if let Some(error) = envelope.error.filter(|e| !e.is_empty()) {
        return Err(EngineError::Rejected(error));
    }
    envelope
        .response
        .ok_or_else(|| EngineError::Decode("missing response".to_string()))
}

/// HTTP adapter for the engine's JSON API
pub struct AceEngine {
    base_url: String,
    /// Short control calls; deadlines come from `timeouts`
    control: Client,
    /// Long-lived media transfers, never timed out by the client
    streaming: Client,
    timeouts: EngineTimeouts,
    sessions: RwLock<HashMap<String, StartedStream>>,
}

impl AceEngine {
    pub fn new(base_url: &str, timeouts: EngineTimeouts) -> Result<Self, EngineError> {
        let control = Client::builder()
            .pool_max_idle_per_host(4)
            .build()?;
        let streaming = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            control,
            streaming,
            timeouts,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, EngineError> {
        let resp = self.control.get(url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::HttpStatus(status));
        }
        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| EngineError::Decode(e.to_string()))
    }

    async fn send_stop(&self, command_url: &str) -> Result<(), EngineError> {
        let resp = self
            .control
            .get(command_url)
            .query(&[("method", "stop")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::HttpStatus(resp.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl Engine for AceEngine {
    async fn start(&self, session: &StreamSession) -> Result<StartedStream, EngineError> {
        let url = format!("{}/ace/getstream", self.base_url);
        let mut query = vec![
            ("format", "json"),
            ("infohash", session.info_hash.as_str()),
            ("pid", session.session_id.as_str()),
        ];
        if let Some(transcode) = session.transcode_audio.as_deref() {
            query.push(("transcode_audio", transcode));
        }

        let envelope: Envelope<StartPayload> =
            with_timeout("start", self.timeouts.start, self.get_json(&url, &query)).await?;
        let payload = unwrap_envelope(envelope)?;

        let started = StartedStream {
            playback_url: payload.playback_url,
            stat_url: payload.stat_url,
            command_url: payload.command_url,
        };
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), started.clone());

        tracing::info!(
            session_id = %session.session_id,
            info_hash = %session.info_hash,
            "Engine started stream"
        );

        Ok(started)
    }

    async fn open_stream(&self, playback_url: &str) -> Result<ByteStream, EngineError> {
        let resp = self.streaming.get(playback_url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::HttpStatus(status));
        }
        Ok(resp.bytes_stream().map_err(EngineError::Transport).boxed())
    }

    async fn stats(&self, session_id: &str) -> Result<EngineStats, EngineError> {
        let stat_url = self
            .sessions
            .read()
            .await
            .get(session_id)
            .and_then(|s| s.stat_url.clone())
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;

        let envelope: Envelope<StatsPayload> =
            with_timeout("stats", self.timeouts.stats, self.get_json(&stat_url, &[])).await?;
        Ok(unwrap_envelope(envelope)?.into())
    }

    async fn stop(&self, session_id: &str) -> Result<(), EngineError> {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(session_id);
            tracing::debug!(session_id = %session_id, remaining = sessions.len(), "Dropped engine session");
            removed
        };
        let Some(started) = removed else {
            tracing::debug!(session_id = %session_id, "No engine session to stop");
            return Ok(());
        };
        let Some(command_url) = started.command_url else {
            return Ok(());
        };

        with_timeout("stop", self.timeouts.stop, self.send_stop(&command_url)).await
    }

    async fn ping(&self) -> Result<String, EngineError> {
        let url = format!("{}/webui/api/service", self.base_url);
        let envelope: VersionEnvelope = with_timeout(
            "ping",
            self.timeouts.ping,
            self.get_json(&url, &[("method", "get_version")]),
        )
        .await?;

        if let Some(error) = envelope.error.filter(|e| !e.is_empty()) {
            return Err(EngineError::Rejected(error));
        }
        Ok(envelope
            .result
            .and_then(|r| r.version)
            .unwrap_or_else(|| "unknown".to_string()))
    }
}
