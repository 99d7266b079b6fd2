use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::StartupError;
use crate::queue::{DispatchQueue, PoolStats, WorkerPool};
use crate::worker::{self, Connection};

// the kernel clamps this to its own configured maximum
const LISTEN_BACKLOG: u32 = i32::MAX as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerState {
    Created,
    Listening,
    Running,
    Stopping,
    Stopped,
}

/// What to do after a failed `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptAction {
    Retry,
    Backoff(Duration),
}

pub fn classify_accept_error(err: &io::Error) -> AcceptAction {
    match err.kind() {
        ErrorKind::Interrupted => AcceptAction::Retry,
        ErrorKind::WouldBlock => AcceptAction::Backoff(Duration::from_millis(50)),
        // EMFILE, ENFILE, ECONNABORTED and friends
        _ => AcceptAction::Backoff(Duration::from_millis(100)),
    }
}

/// Lifecycle state shared between the server and its shutdown handles.
#[derive(Debug)]
struct Lifecycle {
    state: watch::Sender<ServerState>,
    shutdown: watch::Sender<bool>,
    listener: Mutex<Option<TcpListener>>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: watch::Sender::new(ServerState::Created),
            shutdown: watch::Sender::new(false),
            listener: Mutex::new(None),
        }
    }

    fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Moves forward to `next`; never backwards.
    fn advance(&self, next: ServerState) -> bool {
        self.state.send_if_modified(|state| {
            if next > *state {
                debug!(from = ?state, to = ?next, "server state change");
                *state = next;
                true
            } else {
                false
            }
        })
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn take_listener(&self) -> Option<TcpListener> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// `Listening -> Running`, handing the listener to the accept loop.
    /// Refused once shutdown has been requested.
    fn begin_running(&self) -> Option<TcpListener> {
        let mut listener = None;
        self.state.send_if_modified(|state| {
            if *state != ServerState::Listening || self.shutdown_requested() {
                return false;
            }
            listener = self.take_listener();
            *state = ServerState::Running;
            true
        });
        listener
    }

    /// Stops a server whose accept loop never ran. Returns false if it is
    /// already running (or further along).
    fn stop_idle(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state > ServerState::Listening {
                return false;
            }
            drop(self.take_listener());
            *state = ServerState::Stopped;
            true
        })
    }
}

/// Cloneable handle used to stop a running [`Server`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    lifecycle: Arc<Lifecycle>,
}

impl ShutdownHandle {
    /// Asks the server to stop without waiting. Safe to call from a signal
    /// handling task.
    pub fn request(&self) {
        let first = self.lifecycle.shutdown.send_if_modified(|stop| !std::mem::replace(stop, true));
        if first {
            info!("shutdown requested");
        }
    }

    /// Stops the server and waits until every worker has exited and leftover
    /// connections have been closed. Calling it again is a no-op.
    pub async fn stop(&self) {
        self.request();
        if self.lifecycle.stop_idle() {
            info!("server stopped before it started running");
            return;
        }
        let mut state = self.lifecycle.state.subscribe();
        let _ = state.wait_for(|s| *s == ServerState::Stopped).await;
    }

    pub fn state(&self) -> ServerState {
        self.lifecycle.state()
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections accepted but never handled, closed during shutdown.
    pub dropped_connections: usize,
}

pub struct Server {
    config: ServerConfig,
    local_addr: SocketAddr,
    lifecycle: Arc<Lifecycle>,
    queue: Arc<DispatchQueue<Connection>>,
    stats: Arc<PoolStats>,
}

impl Server {
    /// Binds and starts listening. Must be called from within a tokio runtime.
    pub fn start(config: ServerConfig) -> Result<Self, StartupError> {
        config.validate()?;

        let lifecycle = Arc::new(Lifecycle::new());
        let listener = bind(config.addr)?;
        let local_addr = listener.local_addr().map_err(StartupError::Listen)?;

        *lifecycle.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        lifecycle.advance(ServerState::Listening);
        info!(addr = %local_addr, workers = config.workers, "server listening");

        Ok(Self {
            config,
            local_addr,
            lifecycle,
            queue: Arc::new(DispatchQueue::new()),
            stats: Arc::new(PoolStats::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        self.lifecycle.state()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    /// Connections waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Spawns the worker pool and accepts connections until shutdown is
    /// requested, then tears everything down.
    pub async fn run(&self) -> ShutdownReport {
        let Some(listener) = self.lifecycle.begin_running() else {
            if self.lifecycle.stop_idle() {
                info!("shutdown requested before the server ran");
            }
            return ShutdownReport::default();
        };

        let buffer_size = self.config.buffer_size;
        let pool = WorkerPool::spawn(
            self.config.workers,
            Arc::clone(&self.queue),
            Arc::clone(&self.stats),
            move |id, conn| worker::handle_connection(id, conn, buffer_size),
        );
        info!(workers = pool.size(), "worker pool running");

        self.accept_loop(listener).await;
        self.shutdown(pool).await
    }

    async fn accept_loop(&self, listener: TcpListener) {
        let mut shutdown = self.lifecycle.shutdown.subscribe();
        loop {
            let accepted = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                result = listener.accept() => result,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    self.queue.push(Connection::new(stream, peer));
                }
                Err(_) if self.lifecycle.shutdown_requested() => break,
                Err(e) => match classify_accept_error(&e) {
                    AcceptAction::Retry => debug!(error = %e, "accept interrupted; retrying"),
                    AcceptAction::Backoff(delay) => {
                        warn!(error = %e, ?delay, "accept failed; backing off");
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }
        drop(listener);
        info!("accept loop finished; listening socket closed");
    }

    async fn shutdown(&self, pool: WorkerPool) -> ShutdownReport {
        self.lifecycle.advance(ServerState::Stopping);

        info!("signalling workers to stop");
        self.queue.close();
        pool.join().await;

        let dropped_connections = close_leftovers(&self.queue).await;

        self.lifecycle.advance(ServerState::Stopped);
        info!(handled = self.stats.handled(), dropped_connections, "server stopped");
        ShutdownReport { dropped_connections }
    }
}

/// Closes every connection still queued once the workers are gone and
/// returns how many there were.
pub async fn close_leftovers(queue: &DispatchQueue<Connection>) -> usize {
    let leftovers = queue.drain();
    let dropped = leftovers.len();
    for conn in leftovers {
        warn!(peer = %conn.peer(), "closing connection that was never handled");
        conn.close().await;
    }
    dropped
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

fn bind(addr: SocketAddr) -> Result<TcpListener, StartupError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(StartupError::Socket)?;

    socket.set_reuseaddr(true).map_err(StartupError::ReuseAddr)?;
    socket.bind(addr).map_err(|source| StartupError::Bind { addr, source })?;
    socket.listen(LISTEN_BACKLOG).map_err(StartupError::Listen)
}
