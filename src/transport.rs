//! Timeout-bounded socket primitives.
//!
//! Control actions run with short deadlines while held connections sit idle
//! for tens of minutes on the same socket, so connect, read and write each
//! carry their own independent budget. Every failure (including a timeout)
//! poisons the handle: the socket is shut down and all later calls fail with
//! [`AmiError::ConnectionClosed`]. Fail-fast, no resurrection.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{AmiError, AmiResult};

/// Byte source bounded by a per-call read budget.
///
/// `read` never returns `Ok(0)`: a clean EOF from the peer surfaces as
/// [`AmiError::ConnectionClosed`].
pub(crate) trait TimedRead: Send {
    async fn read(&mut self, buf: &mut [u8]) -> AmiResult<usize>;
}

async fn read_with_timeout(
    stream: &mut (impl tokio::io::AsyncRead + Unpin),
    buf: &mut [u8],
    budget: Duration,
) -> AmiResult<usize> {
    match timeout(budget, stream.read(buf)).await {
        Ok(Ok(0)) => Err(AmiError::ConnectionClosed),
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(AmiError::Io(e)),
        Err(_) => Err(AmiError::ReadTimeout {
            timeout_ms: budget.as_millis() as u64,
        }),
    }
}

async fn write_with_timeout(
    stream: &mut (impl tokio::io::AsyncWrite + Unpin),
    bytes: &[u8],
    budget: Duration,
) -> AmiResult<()> {
    // write_all retries partial writes internally; the caller either gets a
    // full write or an error, never a short count.
    match timeout(budget, stream.write_all(bytes)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AmiError::Io(e)),
        Err(_) => Err(AmiError::WriteTimeout {
            timeout_ms: budget.as_millis() as u64,
        }),
    }
}

/// A TCP stream whose read and write calls are bounded by explicit budgets.
///
/// Used whole during the connect handshake and on FastAGI connections;
/// [`into_split`](TimedSocket::into_split) hands the halves to the reader
/// task and the client writer.
#[derive(Debug)]
pub(crate) struct TimedSocket {
    stream: Option<TcpStream>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl TimedSocket {
    /// Establish a TCP connection within `connect_timeout`.
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> AmiResult<Self> {
        match timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                debug!("[CONNECT] TCP connection established");
                Ok(Self {
                    stream: Some(stream),
                    read_timeout,
                    write_timeout,
                })
            }
            Ok(Err(e)) => {
                warn!("[CONNECT] TCP connect failed: {}", e);
                Err(AmiError::Io(e))
            }
            Err(_) => {
                warn!(
                    "[CONNECT] TCP connect timed out after {}ms",
                    connect_timeout.as_millis()
                );
                Err(AmiError::ConnectTimeout {
                    timeout_ms: connect_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Wrap an accepted stream (FastAGI server side).
    pub(crate) fn from_stream(
        stream: TcpStream,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            stream: Some(stream),
            read_timeout,
            write_timeout,
        }
    }

    /// Write all bytes within the write budget.
    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> AmiResult<()> {
        let budget = self.write_timeout;
        let stream = self.stream.as_mut().ok_or(AmiError::ConnectionClosed)?;
        match write_with_timeout(stream, bytes, budget).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Close the socket. Idempotent.
    pub(crate) fn close(&mut self) {
        // Dropping the stream closes the descriptor.
        self.stream.take();
    }

    /// Split into independently-owned read and write halves, carrying the
    /// configured budgets along.
    pub(crate) fn into_split(mut self) -> AmiResult<(TimedReader, TimedWriter)> {
        let stream = self.stream.take().ok_or(AmiError::ConnectionClosed)?;
        let (read_half, write_half) = stream.into_split();
        Ok((
            TimedReader {
                half: Some(read_half),
                read_timeout: self.read_timeout,
            },
            TimedWriter {
                half: Some(write_half),
                write_timeout: self.write_timeout,
            },
        ))
    }
}

impl TimedRead for TimedSocket {
    async fn read(&mut self, buf: &mut [u8]) -> AmiResult<usize> {
        let budget = self.read_timeout;
        let stream = self.stream.as_mut().ok_or(AmiError::ConnectionClosed)?;
        match read_with_timeout(stream, buf, budget).await {
            Ok(n) => Ok(n),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }
}

/// Read half of a split [`TimedSocket`]. Owned exclusively by the reader task.
pub(crate) struct TimedReader {
    half: Option<OwnedReadHalf>,
    read_timeout: Duration,
}

impl TimedRead for TimedReader {
    async fn read(&mut self, buf: &mut [u8]) -> AmiResult<usize> {
        let budget = self.read_timeout;
        let half = self.half.as_mut().ok_or(AmiError::ConnectionClosed)?;
        match read_with_timeout(half, buf, budget).await {
            Ok(n) => Ok(n),
            Err(e) => {
                self.half.take();
                Err(e)
            }
        }
    }
}

/// Write half of a split [`TimedSocket`]. Shared behind the client's writer
/// mutex so one action's bytes are never interleaved with another's.
pub(crate) struct TimedWriter {
    half: Option<OwnedWriteHalf>,
    write_timeout: Duration,
}

impl TimedWriter {
    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> AmiResult<()> {
        let budget = self.write_timeout;
        let half = self.half.as_mut().ok_or(AmiError::ConnectionClosed)?;
        match write_with_timeout(half, bytes, budget).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.half.take();
                Err(e)
            }
        }
    }

    /// Shut down the write direction, signalling the peer to close.
    /// Idempotent.
    pub(crate) async fn shutdown(&mut self) -> AmiResult<()> {
        if let Some(mut half) = self.half.take() {
            half.shutdown().await.map_err(AmiError::Io)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    async fn local_pair() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr.ip().to_string())
    }

    #[tokio::test]
    async fn connect_and_read() {
        let (listener, host) = local_pair().await;
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            peer.write_all(b"hello").await.unwrap();
        });

        let mut socket = TimedSocket::connect(
            &host,
            port,
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let mut buf = [0u8; 16];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn read_timeout_poisons_socket() {
        let (listener, host) = local_pair().await;
        let port = listener.local_addr().unwrap().port();

        // Accept but never send anything.
        tokio::spawn(async move {
            let (_peer, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut socket = TimedSocket::connect(
            &host,
            port,
            Duration::from_secs(1),
            Duration::from_millis(50),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let mut buf = [0u8; 16];
        let err = socket.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, AmiError::ReadTimeout { timeout_ms: 50 }));

        // Poisoned: every later call fails without touching the network.
        let err = socket.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, AmiError::ConnectionClosed));
        let err = socket.write_all(b"x").await.unwrap_err();
        assert!(matches!(err, AmiError::ConnectionClosed));
    }

    #[tokio::test]
    async fn eof_is_connection_closed_not_zero() {
        let (listener, host) = local_pair().await;
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (peer, _) = listener.accept().await.unwrap();
            drop(peer);
        });

        let mut socket = TimedSocket::connect(
            &host,
            port,
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let mut buf = [0u8; 16];
        let err = socket.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, AmiError::ConnectionClosed));
    }

    #[tokio::test]
    async fn connect_refused() {
        // Bind then drop to get a port that refuses connections.
        let (listener, host) = local_pair().await;
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TimedSocket::connect(
            &host,
            port,
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AmiError::Io(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (listener, host) = local_pair().await;
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let mut socket = TimedSocket::connect(
            &host,
            port,
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        socket.close();
        socket.close();
        let mut buf = [0u8; 4];
        assert!(matches!(
            socket.read(&mut buf).await.unwrap_err(),
            AmiError::ConnectionClosed
        ));
    }
}
