//! TCP listener for the telemetry protocol.
//!
//! Accepts connections and spawns one session per connection. Session
//! failures are handled at the session boundary; the accept loop keeps
//! running until shutdown is requested, then closes every live session
//! and waits for them to finish.

use crate::config::{Config, MetricksSource};
use crate::connection::{ConnectionInfo, ConnectionRegistry};
use crate::dispatch::Handler;
use crate::metrics::{self, MetricsRegistry};
use crate::session::Session;
use crate::storage::{FileStore, RecordStore};
use crate::telemetry::{NoiseSource, NormalNoise, TelemetryGenerator};
use chrono::{DateTime, Local};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Process-wide state shared by every session.
pub struct ServerState {
    pub generator: Mutex<TelemetryGenerator<Box<dyn NoiseSource>>>,
    pub store: Arc<dyn RecordStore>,
    pub metrics: Arc<MetricsRegistry>,
    pub connections: Mutex<ConnectionRegistry>,
    pub metricks: MetricksSource,
    pub started_at: DateTime<Local>,
}

impl ServerState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        noise: Box<dyn NoiseSource>,
        metrics: Arc<MetricsRegistry>,
        metricks: MetricksSource,
    ) -> Self {
        Self {
            generator: Mutex::new(TelemetryGenerator::new(noise)),
            store,
            metrics,
            connections: Mutex::new(ConnectionRegistry::new()),
            metricks,
            started_at: Local::now(),
        }
    }

    /// State for a configured server: file-backed store, seeded generator.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(FileStore::new(config.records.clone())),
            Box::new(NormalNoise::new(config.seed)),
            MetricsRegistry::with_defaults(),
            config.metricks,
        )
    }

    pub fn live_sessions(&self) -> usize {
        self.registry().len()
    }

    /// Ask one live session to close.
    pub fn close_session(&self, id: usize) -> bool {
        self.registry().close(id)
    }

    /// Ask every live session to close, returning how many were signalled.
    pub fn close_sessions(&self) -> usize {
        self.registry().close_all()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, ConnectionRegistry> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Server instance
pub struct Server {
    config: Config,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let state = Arc::new(ServerState::from_config(&config));
        Self::with_state(config, state)
    }

    pub fn with_state(config: Config, state: Arc<ServerState>) -> Self {
        Server {
            config,
            state,
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Cancelling the returned token stops the accept loop and closes
    /// every live session.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the configured address and accept connections until Ctrl-C
    /// or the shutdown handle fires.
    pub async fn run(&self) -> io::Result<()> {
        let listener = bind(self.config.listen)?;
        info!(address = %self.config.listen, "Server listening");

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        info!("Interrupt received, shutting down");
                        shutdown.cancel();
                    }
                    Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
                },
            }
        });

        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");
                    let state = Arc::clone(&self.state);
                    let delimiter = self.config.delimiter;
                    self.sessions.spawn(async move {
                        handle_connection(stream, peer, state, delimiter).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    self.state.metrics.increment(metrics::ERRORS);
                }
            }
        }

        drop(listener);
        let closing = self.state.close_sessions();
        info!(sessions = closing, "Shutting down, closing live sessions");
        self.sessions.close();
        self.sessions.wait().await;
        info!("Server stopped");
        Ok(())
    }
}

/// Run one session to completion and drop it from the registry.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
    delimiter: u8,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let close_signal = CancellationToken::new();
    let id = state
        .registry()
        .insert(ConnectionInfo::new(peer, close_signal.clone()));
    let handler = Handler::new(Arc::clone(&state));
    let mut session = Session::new(id, stream, handler, delimiter).with_close_signal(close_signal);

    if let Err(e) = session.run().await {
        debug!(session = id, peer = %peer, error = %e, "Connection error");
    }

    if let Some(info) = state.registry().remove(id) {
        debug!(
            session = id,
            peer = %peer,
            duration_ms = info.age().as_millis() as u64,
            "Connection finished"
        );
    }
}

/// Create a TCP listener with SO_REUSEADDR.
pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}
