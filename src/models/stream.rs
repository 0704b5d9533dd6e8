use serde::{Deserialize, Serialize};
use std::fmt;

/// Playback session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Requested,
    Started,
    Streaming,
    Stopped,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Requested => write!(f, "requested"),
            SessionState::Started => write!(f, "started"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// One playback request against the engine
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub info_hash: String,
    /// Per-request token handed to the engine as its `pid`
    pub session_id: String,
    pub transcode_audio: Option<String>,
    pub playback_url: Option<String>,
    pub bytes_relayed: u64,
    pub state: SessionState,
}

impl StreamSession {
    pub fn new(info_hash: impl Into<String>, transcode_audio: Option<String>) -> Self {
        Self {
            info_hash: info_hash.into(),
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            transcode_audio,
            playback_url: None,
            bytes_relayed: 0,
            state: SessionState::Requested,
        }
    }
}

/// Engine accepted a start call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedStream {
    pub playback_url: String,
    pub stat_url: Option<String>,
    pub command_url: Option<String>,
}

/// Swarm statistics for a running session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub status: String,
    pub peers: u32,
    /// KiB/s as reported by the engine
    pub down_speed: u64,
    pub up_speed: u64,
    pub downloaded: u64,
    pub uploaded: u64,
}

/// Query parameters for the playback endpoint
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub id: String,
    #[serde(default)]
    pub transcode_audio: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_ids_are_unique() {
        let a = StreamSession::new("a".repeat(40), None);
        let b = StreamSession::new("a".repeat(40), None);
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.state, SessionState::Requested);
        assert_eq!(a.bytes_relayed, 0);
    }
}
