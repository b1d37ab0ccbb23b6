//! Connection lifecycle state and the registry of live sessions.
//!
//! Each session tracks where its transport is in the lifecycle; the
//! listener keeps one registry entry per live session, keyed by
//! connection id, and removes it once the session is closed. Each entry
//! carries the session's close signal so the owner can end it early.

use slab::Slab;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Transport handshake in progress.
    Connecting,
    /// Reading requests and writing responses.
    Open,
    /// I/O failure, QUIT, or explicit close; no new reads.
    Closing,
    /// Transport released. Terminal.
    Closed,
}

impl ConnState {
    /// Handshake completed.
    pub fn open(&mut self) {
        if *self == ConnState::Connecting {
            *self = ConnState::Open;
        }
    }

    /// Begin teardown. Has no effect once already closed.
    pub fn close(&mut self) {
        if *self != ConnState::Closed {
            *self = ConnState::Closing;
        }
    }

    /// Transport released.
    pub fn finish(&mut self) {
        *self = ConnState::Closed;
    }

    pub fn is_open(&self) -> bool {
        *self == ConnState::Open
    }

    /// Whether writes may still be queued.
    pub fn accepts_writes(&self) -> bool {
        matches!(self, ConnState::Connecting | ConnState::Open)
    }
}

/// Registry entry for a live session.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer: SocketAddr,
    pub opened_at: Instant,
    close: CancellationToken,
}

impl ConnectionInfo {
    pub fn new(peer: SocketAddr, close: CancellationToken) -> Self {
        Self {
            peer,
            opened_at: Instant::now(),
            close,
        }
    }

    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Ask the session to close. Its pending read is abandoned.
    pub fn request_close(&self) {
        self.close.cancel();
    }

    pub fn close_requested(&self) -> bool {
        self.close.is_cancelled()
    }
}

/// Registry of live sessions using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Slab<ConnectionInfo>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new connection, returning its id.
    pub fn insert(&mut self, info: ConnectionInfo) -> usize {
        self.connections.insert(info)
    }

    pub fn get(&self, id: usize) -> Option<&ConnectionInfo> {
        self.connections.get(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<ConnectionInfo> {
        self.connections.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ConnectionInfo)> {
        self.connections.iter()
    }

    /// Signal one session to close. Entries stay until the session removes them.
    pub fn close(&self, id: usize) -> bool {
        match self.connections.get(id) {
            Some(info) => {
                info.request_close();
                true
            }
            None => false,
        }
    }

    /// Signal every live session to close, returning how many were signalled.
    pub fn close_all(&self) -> usize {
        for (_, info) in self.connections.iter() {
            info.request_close();
        }
        self.connections.len()
    }
}
