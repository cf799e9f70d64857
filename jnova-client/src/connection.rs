//! Connection management.

use crate::error::ClientError;
use bytes::{Bytes, BytesMut};
use jnova_protocol::{Framing, ProtocolError, DEFAULT_HOST, DEFAULT_PORT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

/// Default read buffer size (4 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connection timeout. `None` waits for the OS to give up.
    pub connect_timeout: Option<Duration>,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    /// Returns the target as `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

/// A single TCP connection to a jnova server.
///
/// The read and write halves are locked independently, so one task can block
/// in [`receive`](Self::receive) while another sends.
pub struct Connection {
    config: ConnectionConfig,
    /// Write half of the stream.
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Read half of the stream.
    reader: Mutex<Option<OwnedReadHalf>>,
    /// Is the connection established?
    connected: AtomicBool,
    /// Flips to true once on close; wakes pending I/O.
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let addr = self.config.addr();
        tracing::debug!("Connecting to {}...", addr);

        let connect = TcpStream::connect((self.config.host.as_str(), self.config.port));
        let result = match self.config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect).await.map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Timeout
            })?,
            None => connect.await,
        };
        let stream = result.map_err(|source| {
            tracing::debug!("Connection failed: {}", source);
            ClientError::Connect {
                addr: addr.clone(),
                source,
            }
        })?;

        // Small command lines should not wait on Nagle
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);

        self.closed.send_replace(false);
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("Connected to {}", addr);

        Ok(())
    }

    /// Writes every byte of `data` or fails.
    pub async fn send_all(&self, data: &[u8]) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let mut closed = self.closed.subscribe();
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;

        tokio::select! {
            result = writer.write_all(data) => {
                result.map_err(ClientError::Send)?;
                tracing::trace!("Sent {} bytes", data.len());
                Ok(())
            }
            _ = signalled(&mut closed) => Err(ClientError::NotConnected),
        }
    }

    /// Reads up to `buf.len()` bytes.
    ///
    /// Returns the number of bytes read (never zero), or
    /// [`ClientError::ConnectionClosed`] when the peer closed the stream or
    /// the connection was closed locally.
    pub async fn receive(&self, buf: &mut [u8]) -> Result<usize, ClientError> {
        let mut closed = self.closed.subscribe();
        let mut reader_guard = self.reader.lock().await;
        let reader = reader_guard.as_mut().ok_or(ClientError::ConnectionClosed)?;

        let n = tokio::select! {
            result = reader.read(buf) => result.map_err(ClientError::Receive)?,
            _ = signalled(&mut closed) => return Err(ClientError::ConnectionClosed),
        };

        tracing::trace!("Received {} bytes", n);

        if n == 0 {
            tracing::debug!("Connection closed by peer (0 bytes)");
            self.connected.store(false, Ordering::SeqCst);
            return Err(ClientError::ConnectionClosed);
        }

        Ok(n)
    }

    /// Reads exactly one frame.
    ///
    /// Each read requests at most the number of bytes the framing still needs,
    /// so bytes past the frame boundary stay in the socket. If the stream
    /// closes first, fails with [`ProtocolError::IncompleteFrame`].
    pub async fn read_frame(
        &self,
        framing: &Framing,
        buf: &mut BytesMut,
    ) -> Result<Bytes, ClientError> {
        let mut chunk = vec![0u8; self.config.read_buffer_size];
        let mut scanned = 0;

        loop {
            if let Some(frame) = framing.decode_from(buf, &mut scanned)? {
                return Ok(frame);
            }

            let want = framing.needed(buf).min(chunk.len());
            match self.receive(&mut chunk[..want]).await {
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(ClientError::ConnectionClosed) => {
                    return Err(ProtocolError::IncompleteFrame {
                        needed: framing.needed(buf),
                    }
                    .into());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Completes once the connection has been closed locally.
    pub async fn closed(&self) {
        signalled(&mut self.closed.subscribe()).await;
    }

    /// Closes the connection. Only the first call has any effect.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if self.closed.send_replace(true) {
            return;
        }

        tracing::debug!("Closing connection to {}", self.config.addr());

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let _ = self.reader.lock().await.take();

        tracing::debug!("Connection closed");
    }
}

async fn signalled(closed: &mut watch::Receiver<bool>) {
    // Err only if the sender is gone, which cannot outlive the connection
    let _ = closed.wait_for(|closed| *closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, ConnectionConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, ConnectionConfig::new("127.0.0.1", port))
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 7070);
        assert_eq!(config.addr(), "127.0.0.1:7070");
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert!(config.connect_timeout.is_none());
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ConnectionConfig::default().with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::default().with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, config) = listener().await;
        drop(listener);

        let conn = Connection::new(config);
        let result = conn.connect().await;
        assert!(matches!(result, Err(ClientError::Connect { .. })));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (listener, config) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"PONG\n").await.unwrap();
            buf
        });

        let conn = Connection::new(config);
        conn.connect().await.unwrap();
        assert!(conn.is_connected());

        conn.send_all(b"PING\n").await.unwrap();
        let mut buf = [0u8; 16];
        let mut received = Vec::new();
        while received.len() < 5 {
            let n = conn.receive(&mut buf).await.unwrap();
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"PONG\n");
        assert_eq!(&server.await.unwrap(), b"PING\n");

        conn.close().await;
    }

    #[tokio::test]
    async fn test_peer_close_is_orderly() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let conn = Connection::new(config);
        conn.connect().await.unwrap();

        let mut buf = [0u8; 16];
        let err = conn.receive(&mut buf).await.unwrap_err();
        assert!(err.is_orderly_close());
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_close_wakes_pending_receive() {
        let (listener, config) = listener().await;
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            // Hold the socket open without writing
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let conn = std::sync::Arc::new(Connection::new(config));
        conn.connect().await.unwrap();

        let reader = conn.clone();
        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            reader.receive(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close().await;

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("receive should wake on close")
            .unwrap();
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let conn = Connection::new(config);
        conn.connect().await.unwrap();
        conn.close().await;
        conn.close().await;

        assert!(matches!(
            conn.send_all(b"PING\n").await,
            Err(ClientError::NotConnected)
        ));
        let mut buf = [0u8; 4];
        assert!(matches!(
            conn.receive(&mut buf).await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_frame_stops_at_boundary() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Two frames in one write
            socket
                .write_all(b"\x00\x00\x00\x03one\x00\x00\x00\x03two")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let conn = Connection::new(config);
        conn.connect().await.unwrap();
        let framing = Framing::length_prefixed();

        let mut buf = BytesMut::new();
        let first = conn.read_frame(&framing, &mut buf).await.unwrap();
        assert_eq!(&first[..], b"one");
        assert!(buf.is_empty());

        // The second frame is still in the socket, not in a discarded buffer
        let mut buf = BytesMut::new();
        let second = conn.read_frame(&framing, &mut buf).await.unwrap();
        assert_eq!(&second[..], b"two");

        conn.close().await;
    }

    #[tokio::test]
    async fn test_read_frame_incomplete() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"PIN").await.unwrap();
        });

        let conn = Connection::new(config);
        conn.connect().await.unwrap();

        let mut buf = BytesMut::new();
        let err = conn
            .read_frame(&Framing::line(), &mut buf)
            .await
            .unwrap_err();
        assert!(err.is_incomplete_frame());
        assert_eq!(&buf[..], b"PIN");
    }
}
