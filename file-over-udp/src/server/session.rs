//! Server transfer session: one file, one client, one ephemeral port.
//!
//! A [`ServerSession`] is created by the dispatcher after it has leased a
//! port, bound the socket and opened the file, and is then moved into its own
//! task.  It owns all of that state; dropping it closes the socket and the
//! file and returns the port to the pool.
//!
//! # Service loop
//! - Receive `FILE <name> GET START <s> END <e>`.
//! - Drop anything that is not from the client's IP, does not parse, names a
//!   different file, is out of bounds, or asks for more than `MAX_CHUNK`.
//! - Otherwise read exactly `e - s + 1` bytes at `s` and reply `DATA <base64>`.
//! - Stop after `idle_timeout` without a valid request, or once the final
//!   range has been served and `linger` passes without a repeat.

use std::io::SeekFrom;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::Instant;

use crate::codec::{self, MAX_CHUNK};
use crate::message::{ChunkRequest, ChunkResponse, MessageError};
use crate::server::{PortLease, ServerConfig};
use crate::socket::{Socket, SocketError, CONTROL_RECV_LIMIT};

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Final range served and the linger period passed quietly.
    Completed,
    /// No valid request within the idle timeout.
    Idle,
    /// Socket or file I/O failed.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub name: String,
    pub port: u16,
    pub chunks_served: u64,
    pub bytes_served: u64,
    pub end: SessionEnd,
}

/// Reasons a chunk request is dropped without reply.
#[derive(Debug, Error)]
enum Rejected {
    #[error("from unexpected host {0}")]
    Stranger(IpAddr),
    #[error("{0}")]
    Malformed(#[from] MessageError),
    #[error("asks for {0:?}, session serves another file")]
    WrongFile(String),
    #[error("range {start}..={end} outside file of {size} bytes")]
    OutOfBounds { start: u64, end: u64, size: u64 },
    #[error("range of {0} bytes exceeds chunk limit")]
    TooLarge(u64),
}

pub struct ServerSession {
    socket: Socket,
    lease: PortLease,
    name: String,
    file: File,
    size: u64,
    client: IpAddr,
    idle_timeout: Duration,
    linger: Duration,
    alive: Arc<()>,
}

impl ServerSession {
    /// Assemble a session from resources the dispatcher already acquired.
    ///
    /// `socket` must be bound to `lease.port()`.
    pub fn new(
        socket: Socket,
        lease: PortLease,
        name: String,
        file: File,
        size: u64,
        client: IpAddr,
        config: &ServerConfig,
    ) -> Self {
        debug_assert_eq!(socket.local_addr.port(), lease.port());
        Self {
            socket,
            lease,
            name,
            file,
            size,
            client,
            idle_timeout: config.idle_timeout,
            linger: config.linger,
            alive: Arc::new(()),
        }
    }

    /// Handle that stops upgrading once this session has ended.
    pub fn liveness(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    pub fn port(&self) -> u16 {
        self.lease.port()
    }

    /// Serve until completion or abandonment.
    pub async fn run(mut self) -> SessionSummary {
        let port = self.port();
        log::info!(
            "[session] {}: serving {} bytes on port {port} to {}",
            self.name,
            self.size,
            self.client
        );

        let mut chunks_served = 0u64;
        let mut bytes_served = 0u64;
        // Nothing to serve for an empty file: go straight to lingering.
        let mut final_served = self.size == 0;

        let mut deadline = Instant::now() + self.patience(final_served);

        let end = loop {
            // Dropped datagrams do not extend the deadline.
            let wait = deadline.saturating_duration_since(Instant::now());
            let (text, from) = match self.socket.recv_text_timeout(CONTROL_RECV_LIMIT, wait).await {
                Ok(datagram) => datagram,
                Err(SocketError::Timeout(_)) if final_served => break SessionEnd::Completed,
                Err(SocketError::Timeout(_)) => {
                    log::warn!(
                        "[session] {}: idle for {:?}, abandoning at {bytes_served}/{} bytes",
                        self.name,
                        self.idle_timeout,
                        self.size
                    );
                    break SessionEnd::Idle;
                }
                Err(SocketError::NotText(from)) => {
                    log::debug!("[session] {}: dropping binary datagram from {from}", self.name);
                    continue;
                }
                Err(e) if e.is_transient() => {
                    log::debug!("[session] {}: {e}", self.name);
                    continue;
                }
                Err(e) => {
                    log::error!("[session] {}: {e}", self.name);
                    break SessionEnd::Failed;
                }
            };

            let request = match self.validate(&text, from.ip()) {
                Ok(request) => request,
                Err(reason) => {
                    log::debug!("[session] {}: dropping {text:?}: {reason}", self.name);
                    continue;
                }
            };

            let bytes = match self.read_range(&request).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!(
                        "[session] {}: read {}..={} failed: {e}",
                        self.name,
                        request.start,
                        request.end
                    );
                    break SessionEnd::Failed;
                }
            };

            let reply = ChunkResponse {
                payload: codec::encode(&bytes),
            };
            if let Err(e) = self.socket.send_text(&reply.encode(), from).await {
                log::warn!("[session] {}: send to {from} failed: {e}", self.name);
                continue;
            }
            chunks_served += 1;
            bytes_served += request.len();
            log::debug!(
                "[session] {}: served {}..={} to {from}",
                self.name,
                request.start,
                request.end
            );

            if request.end + 1 == self.size {
                final_served = true;
            }
            deadline = Instant::now() + self.patience(final_served);
        };

        log::info!(
            "[session] {}: closed port {port} ({end:?}, {chunks_served} chunk(s), {bytes_served} bytes)",
            self.name
        );
        SessionSummary {
            name: self.name,
            port,
            chunks_served,
            bytes_served,
            end,
        }
    }

    fn patience(&self, final_served: bool) -> Duration {
        if final_served {
            self.linger
        } else {
            self.idle_timeout
        }
    }

    fn validate(&self, text: &str, from: IpAddr) -> Result<ChunkRequest, Rejected> {
        if from != self.client {
            return Err(Rejected::Stranger(from));
        }
        let request = ChunkRequest::decode(text)?;
        if request.name != self.name {
            return Err(Rejected::WrongFile(request.name));
        }
        if request.end >= self.size {
            return Err(Rejected::OutOfBounds {
                start: request.start,
                end: request.end,
                size: self.size,
            });
        }
        if request.len() > MAX_CHUNK {
            return Err(Rejected::TooLarge(request.len()));
        }
        Ok(request)
    }

    async fn read_range(&mut self, request: &ChunkRequest) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; request.len() as usize];
        self.file.seek(SeekFrom::Start(request.start)).await?;
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}
