//! Deadline-guarded writes toward a playback client.
//!
//! Every write gets its own deadline. A client that cannot take the bytes
//! in time ends the relay with [`WriteError::SlowClient`], which carries the
//! byte count so far and is kept apart from ordinary I/O failures.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A client-facing byte sink.
///
/// Sinks that can enforce a write deadline themselves say so through
/// [`RelaySink::set_write_deadline`]; the rest are bounded by a timer.
pub trait RelaySink: AsyncWrite + Unpin + Send {
    /// Arm (`Some`) or clear (`None`) a sink-enforced write deadline.
    /// Returns false when the sink has no such capability.
    fn set_write_deadline(&mut self, _deadline: Option<Instant>) -> bool {
        false
    }
}

impl RelaySink for DuplexStream {}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("client too slow: write blocked longer than {timeout:?} after {bytes_written} bytes")]
    SlowClient { bytes_written: u64, timeout: Duration },

    #[error("client disconnected after {bytes_written} bytes")]
    ClientGone { bytes_written: u64 },

    #[error("write cancelled after {bytes_written} bytes")]
    Cancelled { bytes_written: u64 },

    #[error("write failed after {bytes_written} bytes: {source}")]
    Io {
        bytes_written: u64,
        #[source]
        source: io::Error,
    },
}

/// Errors some sinks raise when their own deadline fires
pub fn is_timeout_shaped(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::TimedOut {
        return true;
    }
    let msg = err.to_string().to_lowercase();
    msg.contains("timed out") || msg.contains("timeout") || msg.contains("deadline")
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

/// Writer that bounds every write by `timeout` and stops on `cancel`.
/// A zero timeout disables the deadline.
pub struct TimeoutWriter<W> {
    inner: W,
    timeout: Duration,
    cancel: CancellationToken,
    bytes_written: u64,
}

impl<W: RelaySink> TimeoutWriter<W> {
    pub fn new(inner: W, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            inner,
            timeout,
            cancel,
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write the whole buffer, one guarded write at a time
    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<(), WriteError> {
        while !buf.is_empty() {
            let n = self.write_once(buf).await?;
            if n == 0 {
                return Err(WriteError::Io {
                    bytes_written: self.bytes_written,
                    source: io::ErrorKind::WriteZero.into(),
                });
            }
            self.bytes_written += n as u64;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Flush and close the sink; the relay is done with it
    pub async fn shutdown(&mut self) -> Result<(), WriteError> {
        let result = match tokio::time::timeout(self.guard_duration(), self.inner.shutdown()).await {
            Ok(result) => result,
            Err(_) => return Err(self.slow_client()),
        };
        result.map_err(|e| self.classify(e))
    }

    async fn write_once(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        if self.timeout.is_zero() {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                result = self.inner.write(buf) => result,
            };
            return result.map_err(|e| self.classify(e));
        }

        let native = self
            .inner
            .set_write_deadline(Some(Instant::now() + self.timeout));

        let result = if native {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.inner.write(buf) => Some(Ok(result)),
            }
        } else {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = tokio::time::timeout(self.timeout, self.inner.write(buf)) => {
                    Some(result.map_err(|_| ()))
                }
            }
        };

        if native {
            self.inner.set_write_deadline(None);
        }

        match result {
            None => Err(self.cancelled()),
            Some(Err(())) => Err(self.slow_client()),
            Some(Ok(Ok(n))) => Ok(n),
            Some(Ok(Err(e))) => Err(self.classify(e)),
        }
    }

    fn guard_duration(&self) -> Duration {
        if self.timeout.is_zero() {
            Duration::MAX
        } else {
            self.timeout
        }
    }

    fn classify(&self, err: io::Error) -> WriteError {
        if is_timeout_shaped(&err) {
            self.slow_client()
        } else if is_disconnect(&err) {
            WriteError::ClientGone {
                bytes_written: self.bytes_written,
            }
        } else {
            WriteError::Io {
                bytes_written: self.bytes_written,
                source: err,
            }
        }
    }

    fn slow_client(&self) -> WriteError {
        WriteError::SlowClient {
            bytes_written: self.bytes_written,
            timeout: self.timeout,
        }
    }

    fn cancelled(&self) -> WriteError {
        WriteError::Cancelled {
            bytes_written: self.bytes_written,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::AsyncReadExt;

    /// Fails every write with a fixed error; may claim deadline support
    struct FailingSink {
        kind: io::ErrorKind,
        message: &'static str,
        native_deadline: bool,
        deadlines: Vec<Option<Instant>>,
    }

    impl FailingSink {
        fn new(kind: io::ErrorKind, message: &'static str, native_deadline: bool) -> Self {
            Self {
                kind,
                message,
                native_deadline,
                deadlines: Vec::new(),
            }
        }
    }

    impl AsyncWrite for FailingSink {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(self.kind, self.message)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl RelaySink for FailingSink {
        fn set_write_deadline(&mut self, deadline: Option<Instant>) -> bool {
            self.deadlines.push(deadline);
            self.native_deadline
        }
    }

    #[tokio::test]
    async fn test_writes_through_and_counts_bytes() {
        let (client, mut reader) = tokio::io::duplex(1024);
        let mut writer = TimeoutWriter::new(client, Duration::from_secs(1), CancellationToken::new());

        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut received = String::new();
        reader.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "hello world");
        assert_eq!(writer.bytes_written(), 11);
    }

    #[tokio::test]
    async fn test_stalled_client_is_slow_client() {
        // Reader kept alive but never drained
        let (client, _reader) = tokio::io::duplex(16);
        let mut writer = TimeoutWriter::new(client, Duration::from_millis(100), CancellationToken::new());

        let err = writer.write_all(&[7u8; 64]).await.unwrap_err();

        assert!(matches!(err, WriteError::SlowClient { bytes_written: 16, .. }));
        assert_eq!(writer.bytes_written(), 16);
    }

    #[tokio::test]
    async fn test_sink_deadline_error_is_slow_client() {
        let sink = FailingSink::new(io::ErrorKind::TimedOut, "i/o timeout", true);
        let mut writer = TimeoutWriter::new(sink, Duration::from_millis(100), CancellationToken::new());

        let err = writer.write_all(b"data").await.unwrap_err();
        assert!(matches!(err, WriteError::SlowClient { bytes_written: 0, .. }));

        // Armed before the write, cleared after it
        let deadlines = &writer.inner.deadlines;
        assert_eq!(deadlines.len(), 2);
        assert!(deadlines[0].is_some());
        assert!(deadlines[1].is_none());
    }

    #[tokio::test]
    async fn test_timeout_shaped_message_is_slow_client() {
        let sink = FailingSink::new(io::ErrorKind::Other, "write deadline exceeded", false);
        let mut writer = TimeoutWriter::new(sink, Duration::from_millis(100), CancellationToken::new());

        let err = writer.write_all(b"data").await.unwrap_err();
        assert!(matches!(err, WriteError::SlowClient { .. }));
    }

    #[tokio::test]
    async fn test_other_io_errors_stay_io() {
        let sink = FailingSink::new(io::ErrorKind::Other, "disk on fire", false);
        let mut writer = TimeoutWriter::new(sink, Duration::from_millis(100), CancellationToken::new());

        let err = writer.write_all(b"data").await.unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
    }

    #[tokio::test]
    async fn test_closed_reader_is_client_gone() {
        let (client, reader) = tokio::io::duplex(64);
        drop(reader);
        let mut writer = TimeoutWriter::new(client, Duration::from_millis(100), CancellationToken::new());

        let err = writer.write_all(b"data").await.unwrap_err();
        assert!(matches!(err, WriteError::ClientGone { bytes_written: 0 }));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_blocked_write() {
        let (client, _reader) = tokio::io::duplex(4);
        let cancel = CancellationToken::new();
        let mut writer = TimeoutWriter::new(client, Duration::from_secs(30), cancel.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let err = writer.write_all(&[0u8; 32]).await.unwrap_err();
        assert!(matches!(err, WriteError::Cancelled { bytes_written: 4 }));
    }

    #[test]
    fn test_timeout_shape_detection() {
        assert!(is_timeout_shaped(&io::Error::new(io::ErrorKind::TimedOut, "x")));
        assert!(is_timeout_shaped(&io::Error::new(io::ErrorKind::Other, "Operation Timed Out")));
        assert!(!is_timeout_shaped(&io::ErrorKind::BrokenPipe.into()));
    }
}
