//! Listening side of the query channel.
//!
//! A [`QueryServer`] accepts inbound connections and runs one request state
//! machine per connection:
//!
//! ```text
//!            start marker               end marker
//!   Idle ─────────────────► InRequest ─────────────► Executing
//!    ▲                                                   │
//!    └──────────── response frame written ◄──────────────┘
//! ```
//!
//! Requests pipelined on one connection are answered strictly in order.
//! A start marker inside an unterminated request closes the connection.

// ============================================================================
// Imports
// ============================================================================

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::protocol::{FrameDecoder, FrameKind, QueryRequest, error_payload, write_frame};

// ============================================================================
// Constants
// ============================================================================

/// How often the accept loop rechecks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bytes read from a client per call.
const READ_BUFFER_SIZE: usize = 8 * 1024;

// ============================================================================
// QueryServer
// ============================================================================

/// Accepts framed queries and answers them through an [`Executor`].
///
/// # Example
///
/// ```ignore
/// let executor = Arc::new(executor_fn(|request| async move {
///     Ok(json!({ "data": { "echo": request.query } }))
/// }));
///
/// let server = QueryServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 1351, executor).await?;
/// // ... serve ...
/// server.shutdown().await;
/// ```
pub struct QueryServer {
    /// Bound address.
    local_addr: SocketAddr,

    /// Answers requests.
    executor: Arc<dyn Executor>,

    /// Live inbound connections.
    connections: AtomicUsize,

    /// Stops the accept loop.
    shutdown: AtomicBool,

    /// Tells live connections to close.
    closing: watch::Sender<bool>,

    /// Accept loop handle, taken on shutdown.
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// QueryServer - Constructor
// ============================================================================

impl QueryServer {
    /// Binds to `ip:port` and starts accepting.
    ///
    /// Use port 0 to let the OS pick a free port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16, executor: Arc<dyn Executor>) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let local_addr = listener.local_addr()?;

        let (closing, _) = watch::channel(false);

        let server = Arc::new(Self {
            local_addr,
            executor,
            connections: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            closing,
            accept_task: Mutex::new(None),
        });

        let server_clone = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server_clone.accept_loop(listener).await;
        });
        *server.accept_task.lock() = Some(handle);

        info!(%local_addr, "QueryServer started");

        Ok(server)
    }
}

// ============================================================================
// QueryServer - Public API
// ============================================================================

impl QueryServer {
    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the number of live inbound connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stops accepting and closes live connections.
    ///
    /// A request already handed to the executor is answered first.
    pub async fn shutdown(&self) {
        info!(local_addr = %self.local_addr, "QueryServer shutting down");

        self.shutdown.store(true, Ordering::SeqCst);
        self.closing.send_replace(true);

        let accept_task = self.accept_task.lock().take();
        if let Some(handle) = accept_task
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Accept loop ended abnormally");
        }

        info!("QueryServer shutdown complete");
    }
}

// ============================================================================
// QueryServer - Accept Loop
// ============================================================================

impl QueryServer {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            // Accept with timeout to allow checking shutdown flag
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.connections.fetch_add(1, Ordering::SeqCst);
                        let outcome = server.handle_connection(stream, addr).await;
                        server.connections.fetch_sub(1, Ordering::SeqCst);

                        match outcome {
                            Ok(()) => debug!(?addr, "Client disconnected"),
                            Err(Error::Io(e)) if is_reset(&e) => {
                                debug!(?addr, error = %e, "Client connection reset");
                            }
                            Err(e) => warn!(?addr, error = %e, "Connection handling failed"),
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    /// Runs the request state machine for one inbound connection.
    async fn handle_connection(&self, mut stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(?addr, "New TCP connection");
        stream.set_nodelay(true)?;

        let mut closing = self.closing.subscribe();
        if *closing.borrow_and_update() {
            return Ok(());
        }

        let mut decoder = FrameDecoder::request();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            while let Some(payload) = decoder.decode()? {
                trace!(?addr, len = payload.len(), "Request received");

                let response = self.dispatch(&payload, addr).await;
                let bytes = serde_json::to_vec(&response)?;
                write_frame(&mut stream, FrameKind::Response, &bytes).await?;

                trace!(?addr, len = bytes.len(), "Response sent");
            }

            let n = tokio::select! {
                read = stream.read(&mut buf) => read?,
                _ = closing.changed() => {
                    debug!(?addr, "Closing connection for shutdown");
                    return Ok(());
                }
            };

            if n == 0 {
                if decoder.in_frame() {
                    debug!(?addr, buffered = decoder.buffered(), "Client closed mid-request");
                }
                return Ok(());
            }

            decoder.extend(&buf[..n]);
        }
    }

    /// Parses and executes one request payload.
    ///
    /// Never fails: malformed requests and executor errors become error
    /// payloads so the connection stays usable.
    async fn dispatch(&self, payload: &[u8], addr: SocketAddr) -> Value {
        let request = match QueryRequest::from_bytes(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(?addr, error = %e, "Malformed request");
                return error_payload(format!("malformed request: {e}"));
            }
        };

        match self.executor.execute(request).await {
            Ok(result) => result,
            Err(Error::Executor { message }) => {
                debug!(?addr, %message, "Executor returned error");
                error_payload(message)
            }
            Err(e) => {
                debug!(?addr, error = %e, "Executor failed");
                error_payload(e.to_string())
            }
        }
    }
}

fn is_reset(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}

// ============================================================================
// Tests
// ============================================================================
