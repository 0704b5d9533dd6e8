//! Playback session driver: start the engine, copy its bytes to the client
//! through a [`TimeoutWriter`], and always ask the engine to stop afterwards.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::models::{SessionState, StreamSession};
use crate::services::engine::{ByteStream, Engine, EngineError};
use crate::services::timeout_writer::{RelaySink, TimeoutWriter, WriteError};

/// Normal ways a relay ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream reached end of stream
    Completed,
    /// Caller cancelled or the client went away
    Cancelled,
}

impl RelayOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::Completed => "completed",
            RelayOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub session_id: String,
    pub info_hash: String,
    pub bytes_relayed: u64,
    pub outcome: RelayOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("engine could not start the stream: {0}")]
    Start(#[source] EngineError),

    #[error("slow client: write blocked longer than {timeout:?} after {bytes_relayed} bytes")]
    SlowClient { bytes_relayed: u64, timeout: Duration },

    #[error("engine stream failed after {bytes_relayed} bytes: {source}")]
    Upstream {
        bytes_relayed: u64,
        #[source]
        source: EngineError,
    },

    #[error("client write failed: {0}")]
    Write(#[source] WriteError),
}

impl RelayError {
    /// Start failures caused by a deadline rather than a refusal
    pub fn is_timeout(&self) -> bool {
        matches!(self, RelayError::Start(e) if e.is_timeout())
    }
}

/// Sends the engine a stop for a session unless disarmed first.
///
/// Covers the paths where the owning future is dropped mid-await, such as a
/// client hanging up while the engine is still starting.
struct StopOnDrop {
    engine: Option<Arc<dyn Engine>>,
    session_id: String,
}

impl StopOnDrop {
    fn new(engine: Arc<dyn Engine>, session_id: &str) -> Self {
        Self {
            engine: Some(engine),
            session_id: session_id.to_string(),
        }
    }

    fn disarm(&mut self) {
        self.engine = None;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        let session_id = std::mem::take(&mut self.session_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::info!(session_id = %session_id, "Session abandoned, stopping engine");
                handle.spawn(async move {
                    if let Err(e) = engine.stop(&session_id).await {
                        tracing::warn!(session_id = %session_id, "Engine stop failed: {}", e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!(session_id = %session_id, "No runtime left to stop engine session");
            }
        }
    }
}

/// A session the engine accepted, with its media stream open
pub struct ActiveStream {
    pub session: StreamSession,
    upstream: ByteStream,
    stop_guard: StopOnDrop,
}

pub struct StreamProxy {
    engine: Arc<dyn Engine>,
    write_timeout: Duration,
}

impl StreamProxy {
    pub fn new(engine: Arc<dyn Engine>, write_timeout: Duration) -> Self {
        Self {
            engine,
            write_timeout,
        }
    }

    /// Requested -> Started. On failure, or if this future is dropped, the
    /// engine is still told to stop.
    pub async fn begin(
        &self,
        info_hash: &str,
        transcode_audio: Option<String>,
    ) -> Result<ActiveStream, RelayError> {
        let mut session = StreamSession::new(info_hash, transcode_audio);
        let mut stop_guard = StopOnDrop::new(self.engine.clone(), &session.session_id);

        let opened = match self.engine.start(&session).await {
            Ok(started) => {
                session.playback_url = Some(started.playback_url.clone());
                self.engine.open_stream(&started.playback_url).await
            }
            Err(e) => Err(e),
        };

        match opened {
            Ok(upstream) => {
                session.state = SessionState::Started;
                tracing::debug!(
                    session_id = %session.session_id,
                    playback_url = ?session.playback_url,
                    "Engine stream opened"
                );
                Ok(ActiveStream {
                    session,
                    upstream,
                    stop_guard,
                })
            }
            Err(e) => {
                session.state = SessionState::Failed;
                tracing::error!(
                    session_id = %session.session_id,
                    info_hash = %session.info_hash,
                    state = %session.state,
                    timeout = e.is_timeout(),
                    "Engine start failed: {}",
                    e
                );
                self.stop_quietly(&session).await;
                stop_guard.disarm();
                metrics::record_relay("failed", 0);
                Err(RelayError::Start(e))
            }
        }
    }

    /// Started -> Streaming -> Stopped | Failed
    pub async fn relay<W: RelaySink>(
        &self,
        active: ActiveStream,
        sink: W,
        cancel: CancellationToken,
    ) -> Result<RelayReport, RelayError> {
        let ActiveStream {
            mut session,
            mut upstream,
            stop_guard,
        } = active;
        let mut writer = TimeoutWriter::new(sink, self.write_timeout, cancel.clone());

        let result = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(RelayOutcome::Cancelled),
                next = upstream.next() => next,
            };

            let chunk = match next {
                None => break Ok(RelayOutcome::Completed),
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    break Err(RelayError::Upstream {
                        bytes_relayed: writer.bytes_written(),
                        source: e,
                    })
                }
            };

            if session.state == SessionState::Started {
                session.state = SessionState::Streaming;
                tracing::debug!(session_id = %session.session_id, "First bytes from engine");
            }

            match writer.write_all(&chunk).await {
                Ok(()) => {}
                Err(WriteError::Cancelled { .. }) | Err(WriteError::ClientGone { .. }) => {
                    break Ok(RelayOutcome::Cancelled)
                }
                Err(WriteError::SlowClient {
                    bytes_written,
                    timeout,
                }) => {
                    break Err(RelayError::SlowClient {
                        bytes_relayed: bytes_written,
                        timeout,
                    })
                }
                Err(e) => break Err(RelayError::Write(e)),
            }
        };

        if let Ok(RelayOutcome::Completed) = result {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(session_id = %session.session_id, "Closing client sink: {}", e);
            }
        }

        session.bytes_relayed = writer.bytes_written();
        self.finish(session, stop_guard, result).await
    }

    async fn finish(
        &self,
        mut session: StreamSession,
        mut stop_guard: StopOnDrop,
        result: Result<RelayOutcome, RelayError>,
    ) -> Result<RelayReport, RelayError> {
        self.stop_quietly(&session).await;
        stop_guard.disarm();

        let bytes = session.bytes_relayed;
        match &result {
            Ok(outcome) => {
                session.state = SessionState::Stopped;
                tracing::info!(
                    session_id = %session.session_id,
                    info_hash = %session.info_hash,
                    bytes = bytes,
                    state = %session.state,
                    outcome = outcome.as_str(),
                    "Relay finished"
                );
                metrics::record_relay(outcome.as_str(), bytes);
            }
            Err(RelayError::SlowClient { timeout, .. }) => {
                session.state = SessionState::Failed;
                tracing::warn!(
                    session_id = %session.session_id,
                    info_hash = %session.info_hash,
                    bytes = bytes,
                    state = %session.state,
                    "Slow client dropped after write blocked for {:?}",
                    timeout
                );
                metrics::record_relay("slow_client", bytes);
            }
            Err(e) => {
                session.state = SessionState::Failed;
                tracing::error!(
                    session_id = %session.session_id,
                    info_hash = %session.info_hash,
                    bytes = bytes,
                    state = %session.state,
                    "Relay failed: {}",
                    e
                );
                metrics::record_relay("failed", bytes);
            }
        }

        result.map(|outcome| RelayReport {
            session_id: session.session_id,
            info_hash: session.info_hash,
            bytes_relayed: bytes,
            outcome,
        })
    }

    /// Best-effort engine stop; failures are only logged
    async fn stop_quietly(&self, session: &StreamSession) {
        if let Err(e) = self.engine.stop(&session.session_id).await {
            tracing::warn!(
                session_id = %session.session_id,
                info_hash = %session.info_hash,
                "Engine stop failed: {}",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EngineStats, StartedStream};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    enum Upstream {
        Chunks(Vec<&'static [u8]>),
        Endless(usize),
        ThenHang(&'static [u8]),
        NeverOpens,
    }

    struct FakeEngine {
        upstream: Upstream,
        reject_start: bool,
        fail_stop: bool,
        stops: Mutex<Vec<String>>,
    }

    impl FakeEngine {
        fn new(upstream: Upstream) -> Self {
            Self {
                upstream,
                reject_start: false,
                fail_stop: false,
                stops: Mutex::new(Vec::new()),
            }
        }

        fn stop_count(&self) -> usize {
            self.stops.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Engine for FakeEngine {
        async fn start(&self, session: &StreamSession) -> Result<StartedStream, EngineError> {
            if self.reject_start {
                return Err(EngineError::Rejected("no such content".to_string()));
            }
            Ok(StartedStream {
                playback_url: format!("fake://{}", session.session_id),
                stat_url: None,
                command_url: None,
            })
        }

        async fn open_stream(&self, _playback_url: &str) -> Result<ByteStream, EngineError> {
            Ok(match &self.upstream {
                Upstream::NeverOpens => return futures::future::pending().await,
                Upstream::Chunks(chunks) => {
                    let items: Vec<Result<Bytes, EngineError>> =
                        chunks.iter().map(|c| Ok(Bytes::from_static(*c))).collect();
                    stream::iter(items).boxed()
                }
                Upstream::Endless(size) => {
                    let chunk = Bytes::from(vec![1u8; *size]);
                    stream::repeat_with(move || Ok(chunk.clone())).boxed()
                }
                Upstream::ThenHang(first) => stream::iter(vec![Ok(Bytes::from_static(*first))])
                    .chain(stream::pending())
                    .boxed(),
            })
        }

        async fn stats(&self, session_id: &str) -> Result<EngineStats, EngineError> {
            Err(EngineError::UnknownSession(session_id.to_string()))
        }

        async fn stop(&self, session_id: &str) -> Result<(), EngineError> {
            self.stops.lock().unwrap().push(session_id.to_string());
            if self.fail_stop {
                return Err(EngineError::Timeout {
                    op: "stop",
                    after: Duration::from_secs(5),
                });
            }
            Ok(())
        }

        async fn ping(&self) -> Result<String, EngineError> {
            Ok("fake".to_string())
        }
    }

    fn proxy(engine: &Arc<FakeEngine>, write_timeout: Duration) -> StreamProxy {
        StreamProxy::new(engine.clone(), write_timeout)
    }

    #[tokio::test]
    async fn test_relay_until_upstream_eof() {
        let engine = Arc::new(FakeEngine::new(Upstream::Chunks(vec![&b"abc"[..], &b"def"[..]])));
        let proxy = proxy(&engine, Duration::from_secs(1));
        let (sink, mut reader) = tokio::io::duplex(1024);

        let active = proxy.begin(HASH, None).await.unwrap();
        let session_id = active.session.session_id.clone();
        let report = proxy.relay(active, sink, CancellationToken::new()).await.unwrap();

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abcdef");
        assert_eq!(report.outcome, RelayOutcome::Completed);
        assert_eq!(report.bytes_relayed, 6);
        assert_eq!(*engine.stops.lock().unwrap(), vec![session_id]);
        assert_eq!(wait_for_stops(&engine).await, 1);
    }

    #[tokio::test]
    async fn test_stalled_client_is_reported_with_bytes() {
        let engine = Arc::new(FakeEngine::new(Upstream::Endless(512)));
        let proxy = proxy(&engine, Duration::from_millis(100));
        // Reader alive but never drained
        let (sink, _reader) = tokio::io::duplex(1024);

        let active = proxy.begin(HASH, None).await.unwrap();
        let err = proxy.relay(active, sink, CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, RelayError::SlowClient { bytes_relayed: 1024, .. }));
        assert_eq!(engine.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_a_normal_outcome() {
        let engine = Arc::new(FakeEngine::new(Upstream::ThenHang(b"first")));
        let proxy = proxy(&engine, Duration::from_secs(1));
        let (sink, _reader) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let active = proxy.begin(HASH, None).await.unwrap();
        let report = proxy.relay(active, sink, cancel).await.unwrap();

        assert_eq!(report.outcome, RelayOutcome::Cancelled);
        assert_eq!(report.bytes_relayed, 5);
        assert_eq!(engine.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_client_disconnect_is_cancelled() {
        let engine = Arc::new(FakeEngine::new(Upstream::Endless(64)));
        let proxy = proxy(&engine, Duration::from_secs(1));
        let (sink, reader) = tokio::io::duplex(1024);
        drop(reader);

        let active = proxy.begin(HASH, None).await.unwrap();
        let report = proxy.relay(active, sink, CancellationToken::new()).await.unwrap();

        assert_eq!(report.outcome, RelayOutcome::Cancelled);
        assert_eq!(engine.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_start_rejection_still_stops() {
        let mut fake = FakeEngine::new(Upstream::Chunks(vec![]));
        fake.reject_start = true;
        let engine = Arc::new(fake);
        let proxy = proxy(&engine, Duration::from_secs(1));

        let err = proxy.begin(HASH, None).await.err().unwrap();

        assert!(matches!(err, RelayError::Start(EngineError::Rejected(_))));
        assert!(!err.is_timeout());
        assert_eq!(engine.stop_count(), 1);
    }

    async fn wait_for_stops(engine: &FakeEngine) -> usize {
        for _ in 0..50 {
            if engine.stop_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Leave room for a duplicate to show up
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop_count()
    }

    #[tokio::test]
    async fn test_abandoned_start_still_stops_engine() {
        let engine = Arc::new(FakeEngine::new(Upstream::NeverOpens));
        let proxy = proxy(&engine, Duration::from_secs(1));

        let attempt = tokio::time::timeout(Duration::from_millis(100), proxy.begin(HASH, None)).await;

        assert!(attempt.is_err());
        assert_eq!(wait_for_stops(&engine).await, 1);
    }

    #[tokio::test]
    async fn test_dropped_active_stream_stops_engine() {
        let engine = Arc::new(FakeEngine::new(Upstream::Chunks(vec![&b"abc"[..]])));
        let proxy = proxy(&engine, Duration::from_secs(1));

        let active = proxy.begin(HASH, None).await.unwrap();
        let session_id = active.session.session_id.clone();
        drop(active);

        assert_eq!(wait_for_stops(&engine).await, 1);
        assert_eq!(*engine.stops.lock().unwrap(), vec![session_id]);
    }

    #[tokio::test]
    async fn test_stop_failure_does_not_fail_relay() {
        let mut fake = FakeEngine::new(Upstream::Chunks(vec![&b"xyz"[..]]));
        fake.fail_stop = true;
        let engine = Arc::new(fake);
        let proxy = proxy(&engine, Duration::from_secs(1));
        let (sink, _reader) = tokio::io::duplex(1024);

        let active = proxy.begin(HASH, Some("mp3".to_string())).await.unwrap();
        assert_eq!(active.session.transcode_audio.as_deref(), Some("mp3"));
        let report = proxy.relay(active, sink, CancellationToken::new()).await.unwrap();

        assert_eq!(report.outcome, RelayOutcome::Completed);
        assert_eq!(report.bytes_relayed, 3);
    }
}
