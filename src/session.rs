//! Per-connection session: framing, dispatch, and the write path.
//!
//! A session owns its transport, partial-frame buffer, and outbound
//! queue. The cycle is read, frame, dispatch, enqueue, drain, read again:
//!
//! ```text
//! Open --message--> dispatch --Continue--> enqueue --> drain --> Open
//!                            --CloseConnection--> Closing --> Closed
//! Open --I/O error, EOF or close signal--> Closing --> Closed
//! ```
//!
//! Responses are written strictly in FIFO order with at most one write in
//! flight; an entry leaves the queue only after its write completed.

use crate::connection::ConnState;
use crate::dispatch::{Dispatch, Effect, Handler};
use crate::error::SessionError;
use crate::metrics::{self, MetricsRegistry};
use crate::protocol::{self, Framer};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// FIFO of serialized messages waiting to be written.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    queue: VecDeque<Bytes>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message; returns true when the queue was empty, i.e. a
    /// write must be started.
    pub fn push(&mut self, message: Bytes) -> bool {
        let was_empty = self.queue.is_empty();
        self.queue.push_back(message);
        was_empty
    }

    /// The message currently being written.
    pub fn front(&self) -> Option<&Bytes> {
        self.queue.front()
    }

    /// Drop the front message once its write completed.
    pub fn complete(&mut self) -> Option<Bytes> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Server side of one connection.
pub struct Session<S> {
    id: usize,
    stream: S,
    framer: Framer,
    outbound: OutboundQueue,
    state: ConnState,
    handler: Handler,
    metrics: Arc<MetricsRegistry>,
    close_signal: CancellationToken,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted stream; accepting completes the handshake.
    pub fn new(id: usize, stream: S, handler: Handler, delimiter: u8) -> Self {
        let metrics = Arc::clone(handler.metrics());
        let mut state = ConnState::Connecting;
        state.open();
        Self {
            id,
            stream,
            framer: Framer::new(delimiter),
            outbound: OutboundQueue::new(),
            state,
            handler,
            metrics,
            close_signal: CancellationToken::new(),
        }
    }

    /// Use `signal` to request an early close from outside the session.
    pub fn with_close_signal(mut self, signal: CancellationToken) -> Self {
        self.close_signal = signal;
        self
    }

    /// Handle that closes this session once cancelled.
    pub fn close_signal(&self) -> CancellationToken {
        self.close_signal.clone()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn pending_writes(&self) -> usize {
        self.outbound.len()
    }

    /// Queue a response for writing.
    ///
    /// Rejected with `ConnectionClosed` once the session is closing.
    pub fn enqueue(&mut self, text: &str) -> Result<bool, SessionError> {
        if !self.state.accepts_writes() {
            return Err(SessionError::ConnectionClosed);
        }
        Ok(self
            .outbound
            .push(protocol::response(text, self.framer.delimiter())))
    }

    /// Drive the session until it closes, then release the transport.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let result = self.serve().await;
        if let Err(ref e) = result {
            debug!(session = self.id, error = %e, "Session transport error");
            self.metrics.increment(metrics::ERRORS);
        }
        self.close().await;
        result
    }

    /// Close the session: drop queued writes and release the transport.
    pub async fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state.close();
        self.outbound.clear();
        if let Err(e) = self.stream.shutdown().await {
            trace!(session = self.id, error = %e, "Shutdown failed");
        }
        self.state.finish();
        debug!(session = self.id, "Session closed");
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        let close_signal = self.close_signal.clone();
        loop {
            if close_signal.is_cancelled() {
                self.close_requested();
                return Ok(());
            }

            while let Some(message) = self.framer.next_message() {
                trace!(session = self.id, request = %message, "Received");

                let Dispatch { response, effect } = self.handler.dispatch(&message);
                if effect == Effect::CloseConnection {
                    debug!(session = self.id, "Client requested close");
                    self.state.close();
                    return Ok(());
                }

                if let Some(text) = response {
                    if self.enqueue(&text)? {
                        let drained = tokio::select! {
                            _ = close_signal.cancelled() => None,
                            result = self.drain() => Some(result),
                        };
                        let Some(result) = drained else {
                            self.close_requested();
                            return Ok(());
                        };
                        result?;
                    }
                }
            }

            let read = tokio::select! {
                _ = close_signal.cancelled() => None,
                read = self.stream.read_buf(self.framer.buffer_mut()) => Some(read),
            };
            let Some(read) = read else {
                self.close_requested();
                return Ok(());
            };

            if read? == 0 {
                if self.framer.pending() > 0 {
                    debug!(
                        session = self.id,
                        pending = self.framer.pending(),
                        "Connection closed with incomplete frame"
                    );
                } else {
                    trace!(session = self.id, "Connection closed by client");
                }
                self.state.close();
                return Ok(());
            }
        }
    }

    fn close_requested(&mut self) {
        debug!(session = self.id, "Close requested by owner");
        self.state.close();
    }

    /// Write queued messages in order until the queue is empty.
    async fn drain(&mut self) -> Result<(), SessionError> {
        while let Some(message) = self.outbound.front() {
            self.stream.write_all(message).await?;
            self.outbound.complete();
            self.metrics.increment(metrics::SENT);
        }
        self.stream.flush().await?;
        Ok(())
    }
}
