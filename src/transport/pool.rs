//! Bounded pool of reusable connections to one endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              ConnectionPool                  │
//! │  ┌────────────┐  acquire   ┌──────────────┐  │
//! │  │ available  │ ─────────► │   in_use     │  │
//! │  │  (idle)    │ ◄───────── │   (busy)     │  │
//! │  └────────────┘  release   └──────────────┘  │
//! │        ▲                          │          │
//! │        │ dial on demand           │ hand-off │
//! │  ┌─────┴──────┐            ┌──────▼───────┐  │
//! │  │   Dialer   │            │ waiters FIFO │  │
//! │  └────────────┘            └──────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - `in_use + available <= created <= max_size`
//! - `created` drops only when a connection is removed or a dial fails
//! - waiters are served strictly in arrival order
//! - hand-off happens under the pool lock, so a waiter is either served or
//!   timed out, never both

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::client::PoolOptions;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::connection::ConnectionHook;
use super::{Connection, Dialer};

// ============================================================================
// Types
// ============================================================================

/// A queued acquire.
struct Waiter {
    /// Queue-local id, used to withdraw on timeout.
    id: u64,
    /// Receives the handed-off connection.
    tx: oneshot::Sender<Connection>,
}

/// Everything the pool mutates, behind one lock.
#[derive(Default)]
struct PoolState {
    /// Idle connections. Most recently released last.
    available: Vec<Connection>,
    /// Busy connections by id.
    in_use: FxHashMap<ConnectionId, Connection>,
    /// Pending acquires, oldest first.
    waiters: VecDeque<Waiter>,
    /// Connections created and not yet removed, including ones being dialed.
    created: usize,
    /// Next waiter id.
    next_waiter: u64,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Idle connections.
    pub available: usize,
    /// Busy connections.
    pub in_use: usize,
    /// Connections counted against `max_size`.
    pub created: usize,
    /// Queued acquires.
    pub waiting: usize,
    /// Configured limit.
    pub max_size: usize,
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Bounded pool of connections to one endpoint.
///
/// Thread-safe; share it as `Arc<ConnectionPool>`.
///
/// # Example
///
/// ```ignore
/// let pool = ConnectionPool::new(PoolOptions::new("127.0.0.1", 1351), None)?;
///
/// let connection = pool.checkout().await?;
/// let result = connection.round_trip(&QueryRequest::new("{ scopes }")).await;
/// match result {
///     Ok(_) => connection.release()?,
///     Err(_) => connection.remove()?,
/// }
/// ```
pub struct ConnectionPool {
    /// Opens new streams.
    dialer: Dialer,

    /// Configuration.
    options: PoolOptions,

    /// Called for each new connection before it is handed out.
    on_created: Option<ConnectionHook>,

    /// Connection sets, waiter queue and counters.
    state: Mutex<PoolState>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

// ============================================================================
// ConnectionPool - Constructor
// ============================================================================

impl ConnectionPool {
    /// Creates an empty pool. No connection is opened until the first acquire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    pub fn new(options: PoolOptions, on_created: Option<ConnectionHook>) -> Result<Arc<Self>> {
        options.validate()?;

        let dialer = Dialer::new(
            options.endpoint()?,
            options.proxy.as_ref(),
            options.connect_timeout(),
        )?;

        debug!(
            endpoint = %dialer.target(),
            proxied = dialer.is_proxied(),
            max_size = options.max_size,
            timeout_ms = options.timeout_ms,
            "ConnectionPool created"
        );

        Ok(Arc::new(Self {
            dialer,
            options,
            on_created,
            state: Mutex::new(PoolState::default()),
            shutdown: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// ConnectionPool - Public API
// ============================================================================

impl ConnectionPool {
    /// Returns the pool configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Returns `in_use + available`.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        let state = self.state.lock();
        state.in_use.len() + state.available.len()
    }

    /// Returns the number of idle connections.
    #[inline]
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.state.lock().available.len()
    }

    /// Returns the number of busy connections.
    #[inline]
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.state.lock().in_use.len()
    }

    /// Returns the number of connections counted against `max_size`.
    #[inline]
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.state.lock().created
    }

    /// Returns the number of queued acquires.
    #[inline]
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Returns all counters from a single lock.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            available: state.available.len(),
            in_use: state.in_use.len(),
            created: state.created,
            waiting: state.waiters.len(),
            max_size: self.options.max_size,
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Acquires a busy connection.
    ///
    /// Reuses an idle connection if one exists, dials a new one if the pool
    /// has room, and otherwise queues until a connection is released or
    /// replaced.
    ///
    /// # Errors
    ///
    /// - [`Error::AcquireTimeout`] if queued past the acquire timeout
    /// - [`Error::ConnectionRefused`] (or another connect error) if dialing fails
    /// - [`Error::PoolClosed`] after shutdown
    pub async fn acquire(&self) -> Result<Connection> {
        let queued = {
            let mut state = self.state.lock();

            if self.is_closed() {
                return Err(Error::PoolClosed);
            }

            if let Some(connection) = state.available.pop() {
                state.in_use.insert(connection.id(), connection.clone());
                trace!(connection_id = %connection.id(), "Reused idle connection");
                return Ok(connection);
            }

            if state.created < self.options.max_size {
                state.created += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                let id = state.next_waiter;
                state.next_waiter += 1;
                state.waiters.push_back(Waiter { id, tx });
                trace!(waiter = id, queued = state.waiters.len(), "Pool saturated, queued");
                Some((id, rx))
            }
        };

        match queued {
            None => {
                let reservation = Reservation::new(self);
                let connection = self.create_connection().await?;
                reservation.keep();

                let mut state = self.state.lock();
                if self.is_closed() {
                    state.created -= 1;
                    drop(state);
                    close_in_background(connection);
                    return Err(Error::PoolClosed);
                }
                state.in_use.insert(connection.id(), connection.clone());
                Ok(connection)
            }
            Some((id, rx)) => self.wait_for_hand_off(id, rx).await,
        }
    }

    /// Acquires a connection wrapped in a [`PooledConnection`] guard.
    ///
    /// The guard removes the connection if it is dropped before
    /// [`release`](PooledConnection::release) or
    /// [`remove`](PooledConnection::remove) is called.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn checkout(self: &Arc<Self>) -> Result<PooledConnection> {
        let connection = self.acquire().await?;
        Ok(PooledConnection {
            pool: Arc::clone(self),
            connection,
            armed: true,
        })
    }

    /// Returns a busy connection to the pool.
    ///
    /// If anyone is queued the connection goes straight to the oldest waiter
    /// instead of becoming idle.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyReleased`] if the connection is already idle
    /// - [`Error::UnknownConnection`] if the pool does not hold it
    pub fn release(&self, connection: &Connection) -> Result<()> {
        let id = connection.id();
        let mut state = self.state.lock();

        if state.available.iter().any(|c| c.id() == id) {
            warn!(connection_id = %id, "Double release rejected");
            return Err(Error::already_released(id));
        }

        let Some(connection) = state.in_use.remove(&id) else {
            return Err(Error::unknown_connection(id));
        };

        if self.is_closed() {
            state.created -= 1;
            drop(state);
            close_in_background(connection);
            return Ok(());
        }

        if let Some(connection) = Self::hand_off(&mut state, connection) {
            trace!(connection_id = %id, "Connection released to idle set");
            state.available.push(connection);
        }

        Ok(())
    }

    /// Destroys a connection.
    ///
    /// The stream is closed in the background. If acquires are queued and
    /// the pool has room, one replacement connection is dialed and handed to
    /// the oldest waiter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConnection`] if the pool does not hold it.
    pub fn remove(self: &Arc<Self>, connection: &Connection) -> Result<()> {
        let id = connection.id();

        let (removed, replace) = {
            let mut state = self.state.lock();

            let removed = match state.in_use.remove(&id) {
                Some(connection) => connection,
                None => {
                    let Some(index) = state.available.iter().position(|c| c.id() == id) else {
                        return Err(Error::unknown_connection(id));
                    };
                    state.available.swap_remove(index)
                }
            };

            state.created -= 1;

            let replace = !state.waiters.is_empty()
                && state.created < self.options.max_size
                && !self.is_closed();
            if replace {
                state.created += 1;
            }

            (removed, replace)
        };

        debug!(connection_id = %id, replace, "Connection removed");
        close_in_background(removed);

        if replace {
            match Handle::try_current() {
                Ok(handle) => {
                    let pool = Arc::clone(self);
                    handle.spawn(async move { pool.replace_for_waiters().await });
                }
                // No runtime to dial on; give the slot back.
                Err(_) => self.state.lock().created -= 1,
            }
        }

        Ok(())
    }

    /// Shuts down the pool.
    ///
    /// Idle connections are closed, queued acquires fail with
    /// [`Error::PoolClosed`], later acquires are rejected, and busy
    /// connections are closed when they are released.
    pub async fn shutdown(&self) {
        info!(endpoint = %self.dialer.target(), "ConnectionPool shutting down");

        self.shutdown.store(true, Ordering::SeqCst);

        let (idle, waiters) = {
            let mut state = self.state.lock();
            let idle: Vec<_> = state.available.drain(..).collect();
            state.created -= idle.len();
            let waiters: Vec<_> = state.waiters.drain(..).collect();
            (idle, waiters)
        };

        // Dropping senders fails the receivers.
        drop(waiters);

        join_all(idle.iter().map(Connection::shutdown)).await;

        info!("ConnectionPool shutdown complete");
    }
}

// ============================================================================
// ConnectionPool - Internals
// ============================================================================

impl ConnectionPool {
    /// Dials a stream and runs the creation hook.
    ///
    /// The caller owns the `created` slot and rolls it back on error.
    async fn create_connection(&self) -> Result<Connection> {
        let dialed = match self.dialer.dial().await {
            Ok(dialed) => dialed,
            Err(e) => {
                warn!(endpoint = %self.dialer.target(), error = %e, "Failed to create connection");
                return Err(e);
            }
        };

        let connection = Connection::from_dialed(dialed, self.dialer.target().clone());

        if let Some(hook) = &self.on_created {
            hook(&connection);
        }

        Ok(connection)
    }

    /// Waits for a queued acquire to be served or to time out.
    async fn wait_for_hand_off(
        &self,
        waiter: u64,
        rx: oneshot::Receiver<Connection>,
    ) -> Result<Connection> {
        let limit = self.options.acquire_timeout();
        let mut pending = PendingWaiter {
            pool: self,
            id: waiter,
            rx,
            done: false,
        };

        let outcome = timeout(limit, &mut pending.rx).await;
        pending.done = true;

        match outcome {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(_)) => Err(Error::PoolClosed),
            Err(_) => {
                let mut state = self.state.lock();

                if let Some(index) = state.waiters.iter().position(|w| w.id == waiter) {
                    state.waiters.remove(index);
                    drop(state);
                    warn!(timeout_ms = duration_ms(limit), "Acquire timed out");
                    return Err(Error::acquire_timeout(duration_ms(limit)));
                }

                // Served while the deadline fired; the value is already sent.
                drop(state);
                pending.rx.try_recv().map_err(|_| Error::PoolClosed)
            }
        }
    }

    /// Dials a replacement after a removal and routes it to the oldest waiter.
    async fn replace_for_waiters(self: Arc<Self>) {
        let connection = match self.create_connection().await {
            Ok(connection) => connection,
            Err(_) => {
                self.state.lock().created -= 1;
                return;
            }
        };

        let orphan = {
            let mut state = self.state.lock();
            if self.is_closed() {
                state.created -= 1;
                Some(connection)
            } else {
                if let Some(connection) = Self::hand_off(&mut state, connection) {
                    trace!(connection_id = %connection.id(), "Replacement parked idle");
                    state.available.push(connection);
                }
                None
            }
        };

        if let Some(connection) = orphan {
            connection.shutdown().await;
        }
    }

    /// Gives `connection` to the oldest live waiter.
    ///
    /// Waiters whose acquire was dropped are skipped. Returns the connection
    /// back if nobody took it.
    fn hand_off(state: &mut PoolState, mut connection: Connection) -> Option<Connection> {
        while let Some(waiter) = state.waiters.pop_front() {
            let id = connection.id();
            state.in_use.insert(id, connection.clone());

            match waiter.tx.send(connection) {
                Ok(()) => {
                    trace!(connection_id = %id, waiter = waiter.id, "Connection handed to waiter");
                    return None;
                }
                Err(returned) => {
                    state.in_use.remove(&id);
                    connection = returned;
                }
            }
        }
        Some(connection)
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Holds one `created` slot while a dial is in flight.
///
/// Dropped without [`keep`](Self::keep) (dial failed or the acquire was
/// cancelled), it gives the slot back.
struct Reservation<'a> {
    pool: &'a ConnectionPool,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn new(pool: &'a ConnectionPool) -> Self {
        Self { pool, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state.lock().created -= 1;
        }
    }
}

// ============================================================================
// PendingWaiter
// ============================================================================

/// A queued acquire that is still waiting.
///
/// Dropped before the wait settles (the acquire future was cancelled), it
/// withdraws from the queue, or, if a connection was already handed over,
/// passes that connection on to the next waiter or the idle set.
struct PendingWaiter<'a> {
    pool: &'a ConnectionPool,
    id: u64,
    rx: oneshot::Receiver<Connection>,
    done: bool,
}

impl Drop for PendingWaiter<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        let pool = self.pool;
        let mut state = pool.state.lock();

        if let Some(index) = state.waiters.iter().position(|w| w.id == self.id) {
            state.waiters.remove(index);
            trace!(waiter = self.id, "Cancelled acquire withdrawn");
            return;
        }

        let Ok(connection) = self.rx.try_recv() else {
            return;
        };

        state.in_use.remove(&connection.id());
        debug!(
            connection_id = %connection.id(),
            waiter = self.id,
            "Cancelled acquire returned hand-off"
        );

        if pool.is_closed() {
            state.created -= 1;
            drop(state);
            close_in_background(connection);
            return;
        }

        if let Some(connection) = ConnectionPool::hand_off(&mut state, connection) {
            state.available.push(connection);
        }
    }
}

// ============================================================================
// PooledConnection
// ============================================================================

/// A busy connection checked out with [`ConnectionPool::checkout`].
///
/// Call [`release`](Self::release) after a completed exchange or
/// [`remove`](Self::remove) after a failed one. Dropped without either,
/// the connection is removed, since its framing state is unknown.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    connection: Connection,
    armed: bool,
}

impl PooledConnection {
    /// Returns the connection to the pool.
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::release`].
    pub fn release(mut self) -> Result<()> {
        self.armed = false;
        self.pool.release(&self.connection)
    }

    /// Destroys the connection.
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::remove`].
    pub fn remove(mut self) -> Result<()> {
        self.armed = false;
        self.pool.remove(&self.connection)
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        debug!(connection_id = %self.connection.id(), "Checked-out connection dropped, removing");
        if let Err(e) = self.pool.remove(&self.connection) {
            trace!(connection_id = %self.connection.id(), error = %e, "Drop-time removal skipped");
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Closes `connection` on the current runtime, or drops it if there is none.
fn close_in_background(connection: Connection) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { connection.shutdown().await });
        }
        Err(_) => drop(connection),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
