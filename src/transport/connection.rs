//! Pooled connection handle.
//!
//! A [`Connection`] wraps one TCP stream to the query server together with
//! the response decoder for that stream. Handles are cheap to clone; all
//! clones share the same stream and identity, which is what the pool uses
//! to track who holds what.
//!
//! # Exchange
//!
//! [`Connection::round_trip`] writes one request frame and reads until one
//! response frame is complete. The stream lock is held for the whole
//! exchange, so two requests never interleave on the wire.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{FrameDecoder, FrameKind, QueryRequest, write_frame};

use super::Endpoint;
use super::dial::Dialed;

// ============================================================================
// Constants
// ============================================================================

/// Bytes read from the socket per call.
const READ_BUFFER_SIZE: usize = 8 * 1024;

// ============================================================================
// Types
// ============================================================================

/// Hook invoked once for every newly created connection.
pub type ConnectionHook = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Stream plus its framing state.
struct Channel {
    stream: TcpStream,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

// ============================================================================
// Connection
// ============================================================================

/// A reusable connection owned by a [`ConnectionPool`](super::ConnectionPool).
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`. Clones share one stream; exchanges on it
/// are serialized.
#[derive(Clone)]
pub struct Connection {
    /// Pool-visible identity.
    id: ConnectionId,
    /// Target the stream leads to (possibly via a proxy).
    endpoint: Endpoint,
    /// Local address of the socket.
    local_addr: Option<SocketAddr>,
    /// When the stream was opened.
    created_at: Instant,
    /// Stream and decoder.
    channel: Arc<Mutex<Channel>>,
}

impl Connection {
    /// Wraps a dialed stream, keeping bytes the tunnel already delivered.
    ///
    /// Early bytes are fed to the response decoder, so the next exchange
    /// sees them exactly as if they had been read from the socket.
    pub(crate) fn from_dialed(dialed: Dialed, endpoint: Endpoint) -> Self {
        let Dialed { stream, early } = dialed;
        let local_addr = stream.local_addr().ok();
        let id = ConnectionId::next();

        debug!(
            connection_id = %id,
            %endpoint,
            ?local_addr,
            early = early.len(),
            "Connection created"
        );

        let mut decoder = FrameDecoder::response();
        decoder.extend(&early);

        Self {
            id,
            endpoint,
            local_addr,
            created_at: Instant::now(),
            channel: Arc::new(Mutex::new(Channel {
                stream,
                decoder,
                read_buf: vec![0u8; READ_BUFFER_SIZE],
            })),
        }
    }

    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the target endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the local socket address, if known.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Time since the stream was opened.
    #[inline]
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Sends one request and waits for its response.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] on socket failure
    /// - [`Error::ConnectionClosed`] if the server hangs up mid-response
    /// - [`Error::Protocol`] / [`Error::FrameTooLarge`] on broken framing
    /// - [`Error::Json`] if the complete response is not valid JSON
    pub async fn round_trip(&self, request: &QueryRequest) -> Result<Value> {
        let payload = request.to_bytes()?;
        let mut guard = self.channel.lock().await;
        let channel = &mut *guard;

        if channel.decoder.buffered() > 0 {
            return Err(Error::protocol(format!(
                "{} unread bytes on {} before request",
                channel.decoder.buffered(),
                self.id
            )));
        }

        write_frame(&mut channel.stream, FrameKind::Request, &payload).await?;
        trace!(connection_id = %self.id, len = payload.len(), "Request sent");

        loop {
            if let Some(body) = channel.decoder.decode()? {
                trace!(connection_id = %self.id, len = body.len(), "Response received");
                return Ok(serde_json::from_slice(&body)?);
            }

            let n = channel.stream.read(&mut channel.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            channel.decoder.extend(&channel.read_buf[..n]);
        }
    }

    /// Closes the underlying stream.
    ///
    /// Waits for any in-flight exchange on another clone to finish first.
    pub async fn shutdown(&self) {
        let mut channel = self.channel.lock().await;
        if let Err(e) = channel.stream.shutdown().await {
            trace!(connection_id = %self.id, error = %e, "Shutdown on closed stream");
        }
        debug!(connection_id = %self.id, "Connection closed");
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::net::TcpListener;

    use crate::protocol::{END_MARKER, START_MARKER};

    async fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let endpoint = Endpoint::new("127.0.0.1", port).expect("endpoint");

        let (client, server) = tokio::join!(
            TcpStream::connect(("127.0.0.1", port)),
            listener.accept()
        );
        let dialed = Dialed {
            stream: client.expect("connect"),
            early: Vec::new(),
        };
        let connection = Connection::from_dialed(dialed, endpoint);
        (connection, server.expect("accept").0)
    }

    /// Reads one request frame from the raw server side.
    async fn read_request(server: &mut TcpStream) -> Vec<u8> {
        let mut decoder = FrameDecoder::request();
        let mut buf = [0u8; 256];
        loop {
            if let Some(payload) = decoder.decode().expect("decode") {
                return payload;
            }
            let n = server.read(&mut buf).await.expect("read");
            assert!(n > 0, "client closed early");
            decoder.extend(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_round_trip_split_response() {
        let (connection, mut server) = pair().await;

        let server_task = tokio::spawn(async move {
            let payload = read_request(&mut server).await;
            assert_eq!(payload, br#"{"query":"Q"}"#);

            // Response deliberately split inside the end marker.
            server.write_all(b"{\"ok\":").await.expect("write");
            server.write_all(b"true}\x1e$EN").await.expect("write");
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.write_all(b"D$").await.expect("write");
            server
        });

        let result = connection
            .round_trip(&QueryRequest::new("Q"))
            .await
            .expect("round trip");
        assert_eq!(result, json!({ "ok": true }));
        server_task.await.expect("server");
    }

    #[tokio::test]
    async fn test_request_bytes_on_wire() {
        let (connection, mut server) = pair().await;

        let server_task = tokio::spawn(async move {
            let mut expected = START_MARKER.to_vec();
            expected.extend_from_slice(br#"{"query":"Q","variables":{"a":1}}"#);
            expected.extend_from_slice(END_MARKER);

            let mut received = vec![0u8; expected.len()];
            server.read_exact(&mut received).await.expect("read");
            assert_eq!(received, expected);

            server.write_all(b"null").await.expect("write");
            server.write_all(END_MARKER).await.expect("write");
            server
        });

        let request = QueryRequest::new("Q").with_variable("a", 1);
        let result = connection.round_trip(&request).await.expect("round trip");
        assert_eq!(result, Value::Null);
        server_task.await.expect("server");
    }

    #[tokio::test]
    async fn test_server_hangup_mid_response() {
        let (connection, mut server) = pair().await;

        tokio::spawn(async move {
            let _ = read_request(&mut server).await;
            server.write_all(b"{\"partial\"").await.expect("write");
            drop(server);
        });

        let err = connection
            .round_trip(&QueryRequest::new("Q"))
            .await
            .expect_err("closed");
        assert!(matches!(err, Error::ConnectionClosed | Error::Io(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_malformed_response_is_json_error() {
        let (connection, mut server) = pair().await;

        tokio::spawn(async move {
            let _ = read_request(&mut server).await;
            server.write_all(b"{not json").await.expect("write");
            server.write_all(END_MARKER).await.expect("write");
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let err = connection
            .round_trip(&QueryRequest::new("Q"))
            .await
            .expect_err("malformed");
        assert!(matches!(err, Error::Json(_)));
    }

    #[tokio::test]
    async fn test_clones_share_identity() {
        let (connection, _server) = pair().await;
        let clone = connection.clone();

        assert_eq!(connection, clone);
        assert_eq!(connection.id(), clone.id());
        assert!(connection.local_addr().is_some());
        assert!(format!("{connection:?}").contains("Connection"));
    }

    #[tokio::test]
    async fn test_early_bytes_surface_on_next_exchange() {
        let (connection, _server) = pair().await;
        let early_connection = Connection::from_dialed(
            Dialed {
                stream: {
                    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
                    let addr = listener.local_addr().expect("addr");
                    TcpStream::connect(addr).await.expect("connect")
                },
                early: b"stray".to_vec(),
            },
            connection.endpoint().clone(),
        );

        let err = early_connection
            .round_trip(&QueryRequest::new("Q"))
            .await
            .expect_err("unread bytes");
        assert!(matches!(err, Error::Protocol { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_shutdown_closes_stream() {
        let (connection, mut server) = pair().await;
        connection.shutdown().await;

        let mut buf = [0u8; 1];
        let n = server.read(&mut buf).await.expect("read");
        assert_eq!(n, 0);
    }
}
