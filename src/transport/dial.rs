//! Outbound stream creation.
//!
//! A [`Dialer`] opens one TCP stream to the target, either directly or
//! through a forward proxy using an HTTP `CONNECT` tunnel.
//!
//! # Proxy Handshake
//!
//! ```text
//! client → proxy:  CONNECT host:port HTTP/1.1\r\n\r\n[handshake body]
//! proxy  → client: HTTP/1.1 200 Connection established\r\n\r\n
//! ```
//!
//! The tunnel is accepted when the response header contains the phrase
//! `Connection established` (case-sensitive). Anything else is returned
//! verbatim in [`Error::ProxyRejected`]. Bytes that arrive in the same read
//! as the header already belong to the tunnel and are handed back in
//! [`Dialed::early`].

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::client::ProxyConfig;
use crate::error::{Error, Result};

use super::Endpoint;

// ============================================================================
// Constants
// ============================================================================

/// Phrase a proxy sends once the tunnel is open.
pub const TUNNEL_ESTABLISHED: &str = "Connection established";

/// Upper bound on a proxy response header.
const MAX_PROXY_RESPONSE: usize = 8 * 1024;

/// Read chunk size during the proxy handshake.
const PROXY_READ_CHUNK: usize = 1024;

// ============================================================================
// Dialed
// ============================================================================

/// A freshly opened stream.
#[derive(Debug)]
pub struct Dialed {
    /// The stream, tunneled if a proxy is configured.
    pub stream: TcpStream,
    /// Tunnel bytes read together with the proxy response header.
    ///
    /// Always empty for direct connections.
    pub early: Vec<u8>,
}

// ============================================================================
// Dialer
// ============================================================================

/// Opens streams to one target endpoint.
#[derive(Debug, Clone)]
pub struct Dialer {
    /// Where queries are served.
    target: Endpoint,
    /// Optional forward proxy and its handshake body.
    proxy: Option<(Endpoint, Option<String>)>,
    /// Bound on a single connection attempt.
    connect_timeout: Option<Duration>,
}

impl Dialer {
    /// Creates a direct dialer.
    #[inline]
    #[must_use]
    pub fn direct(target: Endpoint) -> Self {
        Self {
            target,
            proxy: None,
            connect_timeout: None,
        }
    }

    /// Creates a dialer from pool configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the proxy endpoint is invalid.
    pub fn new(
        target: Endpoint,
        proxy: Option<&ProxyConfig>,
        connect_timeout: Option<Duration>,
    ) -> Result<Self> {
        let proxy = proxy
            .map(|p| Ok::<_, Error>((p.endpoint()?, p.handshake.clone())))
            .transpose()?;

        Ok(Self {
            target,
            proxy,
            connect_timeout,
        })
    }

    /// Returns the target endpoint.
    #[inline]
    #[must_use]
    pub fn target(&self) -> &Endpoint {
        &self.target
    }

    /// Returns `true` when connections go through a proxy.
    #[inline]
    #[must_use]
    pub fn is_proxied(&self) -> bool {
        self.proxy.is_some()
    }

    /// Opens a new stream to the target.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionRefused`] if the target (or proxy) refuses
    /// - [`Error::Connection`] for other connect failures
    /// - [`Error::ConnectionTimeout`] if the connect timeout elapses
    /// - [`Error::ProxyRejected`] if the proxy does not open the tunnel
    pub async fn dial(&self) -> Result<Dialed> {
        let attempt = async {
            match &self.proxy {
                None => Ok(Dialed {
                    stream: connect_direct(&self.target).await?,
                    early: Vec::new(),
                }),
                Some((proxy, handshake)) => {
                    connect_through_proxy(proxy, &self.target, handshake.as_deref()).await
                }
            }
        };

        let dialed = match self.connect_timeout {
            Some(limit) => timeout(limit, attempt).await.map_err(|_| {
                Error::connection_timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
            })??,
            None => attempt.await?,
        };

        dialed.stream.set_nodelay(true)?;
        Ok(dialed)
    }
}

// ============================================================================
// Connect Helpers
// ============================================================================

/// Opens a plain TCP stream.
async fn connect_direct(endpoint: &Endpoint) -> Result<TcpStream> {
    let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| Error::from_connect(endpoint.to_string(), e))?;

    trace!(%endpoint, "TCP connection established");
    Ok(stream)
}

/// Opens a stream to `proxy` and asks it to tunnel to `target`.
async fn connect_through_proxy(
    proxy: &Endpoint,
    target: &Endpoint,
    handshake: Option<&str>,
) -> Result<Dialed> {
    let mut stream = connect_direct(proxy).await?;

    let request = format!(
        "CONNECT {target} HTTP/1.1\r\n\r\n{}",
        handshake.unwrap_or_default()
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let (response, early) = read_proxy_response(&mut stream).await?;

    if response.contains(TUNNEL_ESTABLISHED) {
        debug!(%proxy, %target, early = early.len(), "Proxy tunnel established");
        Ok(Dialed { stream, early })
    } else {
        warn!(%proxy, %target, response = %response.trim_end(), "Proxy rejected tunnel");
        Err(Error::proxy_rejected(response))
    }
}

/// Reads the proxy reply up to the end of its header.
///
/// Returns the header text and any bytes read past it.
async fn read_proxy_response(stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
    let mut response = Vec::with_capacity(PROXY_READ_CHUNK);
    let mut chunk = [0u8; PROXY_READ_CHUNK];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if response.is_empty() {
                return Err(Error::ConnectionClosed);
            }
            break;
        }

        response.extend_from_slice(&chunk[..n]);

        if let Some(end) = header_end(&response) {
            let early = response.split_off(end);
            return Ok((String::from_utf8_lossy(&response).into_owned(), early));
        }
        if response.len() > MAX_PROXY_RESPONSE {
            return Err(Error::proxy_rejected(format!(
                "response header exceeds {MAX_PROXY_RESPONSE} bytes"
            )));
        }
    }

    Ok((String::from_utf8_lossy(&response).into_owned(), Vec::new()))
}

/// Offset just past the blank line ending a response header.
fn header_end(bytes: &[u8]) -> Option<usize> {
    let crlf = bytes.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    let lf = bytes.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    async fn local_listener() -> (TcpListener, Endpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        (listener, Endpoint::new("127.0.0.1", port).expect("endpoint"))
    }

    /// Spawns a proxy that answers the first CONNECT with `reply`.
    ///
    /// Resolves to the CONNECT request text and every byte the client sent
    /// through the tunnel before closing it.
    async fn fake_proxy(
        reply: &'static str,
    ) -> (Endpoint, tokio::task::JoinHandle<(String, Vec<u8>)>) {
        let (listener, endpoint) = local_listener().await;
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 512];
            let n = socket.read(&mut buf).await.expect("read");
            socket.write_all(reply.as_bytes()).await.expect("reply");
            let mut tunneled = Vec::new();
            let _ = socket.read_to_end(&mut tunneled).await;
            (String::from_utf8_lossy(&buf[..n]).into_owned(), tunneled)
        });
        (endpoint, handle)
    }

    #[tokio::test]
    async fn test_dial_direct() {
        let (listener, endpoint) = local_listener().await;
        let dialer = Dialer::direct(endpoint.clone());

        let (dialed, accepted) = tokio::join!(dialer.dial(), listener.accept());
        let dialed = dialed.expect("dial");
        let (_, peer) = accepted.expect("accept");

        assert_eq!(dialed.stream.local_addr().expect("addr"), peer);
        assert!(dialed.early.is_empty());
        assert!(!dialer.is_proxied());
        assert_eq!(dialer.target(), &endpoint);
    }

    #[tokio::test]
    async fn test_dial_refused_is_tagged() {
        let (listener, endpoint) = local_listener().await;
        drop(listener);

        let err = Dialer::direct(endpoint).dial().await.expect_err("refused");
        assert!(matches!(err, Error::ConnectionRefused { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_dial_through_proxy() {
        let (proxy, handle) = fake_proxy("HTTP/1.1 200 Connection established\r\n\r\n").await;
        let target = Endpoint::new("10.0.0.7", 1351).expect("endpoint");
        let config = ProxyConfig::new(proxy.host.clone(), proxy.port);

        let dialer = Dialer::new(target, Some(&config), None).expect("dialer");
        assert!(dialer.is_proxied());

        let mut stream = dialer.dial().await.expect("tunnel").stream;
        stream.write_all(b"tunneled").await.expect("write");
        drop(stream);

        let (request, tunneled) = handle.await.expect("proxy task");
        assert!(request.starts_with("CONNECT 10.0.0.7:1351 HTTP/1.1\r\n\r\n"));
        assert_eq!(tunneled, b"tunneled");
    }

    #[tokio::test]
    async fn test_proxy_handshake_body_is_sent() {
        let (proxy, handle) = fake_proxy("HTTP/1.1 200 Connection established\r\n\r\n").await;
        let target = Endpoint::new("db.internal", 27018).expect("endpoint");
        let config = ProxyConfig::new(proxy.host.clone(), proxy.port).with_handshake("token=abc");

        let stream = Dialer::new(target, Some(&config), None)
            .expect("dialer")
            .dial()
            .await
            .expect("tunnel");
        drop(stream);

        let (request, _) = handle.await.expect("proxy task");
        assert!(request.ends_with("\r\n\r\ntoken=abc"));
    }

    #[tokio::test]
    async fn test_proxy_rejection_carries_response() {
        let (proxy, _handle) = fake_proxy("HTTP/1.1 403 Forbidden\r\n\r\n").await;
        let config = ProxyConfig::new(proxy.host.clone(), proxy.port);
        let dialer = Dialer::new(Endpoint::new("x", 1).expect("endpoint"), Some(&config), None)
            .expect("dialer");

        let err = dialer.dial().await.expect_err("rejected");
        match err {
            Error::ProxyRejected { response } => assert!(response.contains("403 Forbidden")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Accepts but never answers the CONNECT.
        let (listener, proxy) = local_listener().await;
        let _hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let config = ProxyConfig::new(proxy.host.clone(), proxy.port);
        let dialer = Dialer::new(
            Endpoint::new("x", 1).expect("endpoint"),
            Some(&config),
            Some(Duration::from_millis(100)),
        )
        .expect("dialer");

        let err = dialer.dial().await.expect_err("timeout");
        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 100 }));
    }

    #[tokio::test]
    async fn test_tunnel_bytes_after_header_are_kept() {
        let (proxy, _handle) =
            fake_proxy("HTTP/1.1 200 Connection established\r\n\r\nearly").await;
        let config = ProxyConfig::new(proxy.host.clone(), proxy.port);
        let dialer = Dialer::new(Endpoint::new("x", 1).expect("endpoint"), Some(&config), None)
            .expect("dialer");

        let Dialed { mut stream, early } = dialer.dial().await.expect("tunnel");

        // Whatever did not arrive with the header is still on the socket.
        let mut received = early;
        let mut buf = [0u8; 16];
        while received.len() < 5 {
            let n = stream.read(&mut buf).await.expect("read");
            assert!(n > 0, "proxy closed early");
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"early");
    }

    #[test]
    fn test_header_end() {
        assert_eq!(header_end(b"HTTP/1.1 200 OK\r\n\r\n"), Some(19));
        assert_eq!(header_end(b"Connection established\n\nrest"), Some(24));
        assert_eq!(header_end(b"HTTP/1.1 200 OK\r\n\r\nabc"), Some(19));
        assert_eq!(header_end(b"HTTP/1.1 200 Connection established\r\n"), None);
    }
}
