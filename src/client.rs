//! Client engine for the telemetry protocol.
//!
//! Mirrors the server session but is driven by user input: lines are
//! submitted through a [`ClientHandle`] from any thread, queued, and sent
//! one at a time. The next line goes out only after the response to the
//! previous one arrived. Received responses are forwarded, suffix
//! stripped, to a channel supplied by the caller.

use crate::connection::ConnState;
use crate::error::ClientError;
use crate::protocol::{self, Framer};
use std::collections::VecDeque;
use std::io::BufRead;
use std::thread;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Input line that closes the client instead of being sent.
pub const EXIT_SENTINEL: &str = "exit";

/// Request that never gets a response: the server closes instead.
const QUIT: &str = "QUIT";

#[derive(Debug)]
enum ClientCommand {
    Write(String),
    Close,
}

/// Thread-safe submission handle for a running [`Client`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    /// Queue a line to be sent.
    pub fn write(&self, line: impl Into<String>) -> Result<(), ClientError> {
        self.tx
            .send(ClientCommand::Write(line.into()))
            .map_err(|_| ClientError::Closed)
    }

    /// Request an orderly close: queued lines are still sent first.
    pub fn close(&self) -> Result<(), ClientError> {
        self.tx
            .send(ClientCommand::Close)
            .map_err(|_| ClientError::Closed)
    }

    /// Route one line of user input. Returns `false` once input should stop.
    pub fn submit(&self, line: &str) -> Result<bool, ClientError> {
        if line == EXIT_SENTINEL {
            self.close()?;
            return Ok(false);
        }
        self.write(line)?;
        Ok(true)
    }
}

/// Read lines from `input` on a dedicated thread and submit them.
///
/// The thread ends at the exit sentinel, at end of input, or once the
/// client has gone away.
pub fn spawn_input_thread<R>(input: R, handle: ClientHandle) -> thread::JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to read input");
                    break;
                }
            };
            match handle.submit(&line) {
                Ok(true) => {}
                Ok(false) | Err(_) => return,
            }
        }
        let _ = handle.close();
    })
}

/// Connected client.
pub struct Client {
    stream: TcpStream,
    framer: Framer,
    outbound: VecDeque<String>,
    awaiting_response: bool,
    state: ConnState,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    responses: mpsc::UnboundedSender<String>,
}

impl Client {
    /// Resolve `host:port`, connect to the first address that accepts, and
    /// return the client with its submission handle.
    pub async fn connect(
        host: &str,
        port: u16,
        delimiter: u8,
        responses: mpsc::UnboundedSender<String>,
    ) -> Result<(Client, ClientHandle), ClientError> {
        let target = format!("{host}:{port}");
        let mut state = ConnState::Connecting;

        let addrs = lookup_host(&target)
            .await
            .map_err(|source| ClientError::Resolve {
                target: target.clone(),
                source,
            })?;

        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    info!(addr = %addr, "Connected");
                    stream = Some(s);
                    break;
                }
                Err(e) => debug!(addr = %addr, error = %e, "Connect attempt failed"),
            }
        }
        let stream = stream.ok_or_else(|| ClientError::Connect(target.clone()))?;
        state.open();

        let (tx, commands) = mpsc::unbounded_channel();
        let client = Client {
            stream,
            framer: Framer::new(delimiter),
            outbound: VecDeque::new(),
            awaiting_response: false,
            state,
            commands,
            responses,
        };
        Ok((client, ClientHandle { tx }))
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Drive reads and writes until the client or the server closes.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        let result = self.serve().await;
        self.state.close();
        if let Err(e) = self.stream.shutdown().await {
            trace!(error = %e, "Shutdown failed");
        }
        self.state.finish();
        info!("Connection closed");
        result
    }

    async fn serve(&mut self) -> Result<(), ClientError> {
        let mut closing = false;
        loop {
            self.send_next().await?;

            // Orderly close: queued lines go out and the last response
            // arrives before the transport is released.
            if closing && self.outbound.is_empty() && !self.awaiting_response {
                return Ok(());
            }

            tokio::select! {
                command = self.commands.recv(), if !closing => match command {
                    Some(ClientCommand::Write(line)) => self.outbound.push_back(line),
                    Some(ClientCommand::Close) | None => {
                        debug!(queued = self.outbound.len(), "Close requested");
                        closing = true;
                    }
                },
                read = self.stream.read_buf(self.framer.buffer_mut()) => {
                    if read? == 0 {
                        debug!("Server closed the connection");
                        return Ok(());
                    }
                    while let Some(message) = self.framer.next_message() {
                        self.awaiting_response = false;
                        let text = protocol::strip_suffix(&message).to_string();
                        if self.responses.send(text).is_err() {
                            trace!("Response receiver dropped");
                        }
                    }
                }
            }
        }
    }

    /// Send the front queued line unless a response is still outstanding.
    async fn send_next(&mut self) -> Result<(), ClientError> {
        if self.awaiting_response {
            return Ok(());
        }
        let Some(line) = self.outbound.front() else {
            return Ok(());
        };

        let wire = self.framer.serialize(line);
        self.stream.write_all(&wire).await?;
        trace!(request = %line, "Sent");
        if line == QUIT {
            debug!("Sent QUIT, waiting for server to close");
        }

        self.awaiting_response = true;
        self.outbound.pop_front();
        Ok(())
    }
}
