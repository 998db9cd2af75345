//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! newline-free UTF-8 text datagrams instead of raw bytes.  All protocol logic
//! lives elsewhere; this module owns only byte I/O, the per-call receive cap,
//! and the receive deadline.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

/// Receive cap for control-channel datagrams (both directions).
pub const CONTROL_RECV_LIMIT: usize = 1024;

/// Receive cap for `DATA` responses on the data channel.
pub const DATA_RECV_LIMIT: usize = 4096;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// No datagram arrived before the deadline.
    #[error("receive timed out after {0:?}")]
    Timeout(Duration),
    /// The datagram was not valid UTF-8.
    #[error("datagram from {0} is not valid UTF-8")]
    NotText(SocketAddr),
}

impl SocketError {
    /// `true` for [`SocketError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Errors a resend may cure: timeouts, and the ICMP-induced resets some
    /// platforms surface on unconnected UDP sockets.
    pub fn is_transient(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::WouldBlock
                    | ErrorKind::Interrupted
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
            ),
            Self::NotText(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, text-oriented UDP socket.
///
/// Sessions never share a `Socket`: each control exchange, client transfer
/// and server transfer binds its own.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Bind an OS-chosen port on the wildcard address matching `peer`'s family.
    pub async fn bind_for(peer: SocketAddr) -> Result<Self, SocketError> {
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        Self::bind(local).await
    }

    /// Send `text` as a single UDP datagram to `dest`.
    pub async fn send_text(&self, text: &str, dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(text.as_bytes(), dest).await?;
        log::trace!("[socket] {} → {dest}: {}", self.local_addr, preview(text));
        Ok(())
    }

    /// Receive the next datagram, reading at most `limit` bytes of it.
    ///
    /// Bytes beyond `limit` are discarded by the OS, as with any short UDP
    /// read.  Returns `(text, sender_address)`.
    pub async fn recv_text(&self, limit: usize) -> Result<(String, SocketAddr), SocketError> {
        let mut buf = vec![0u8; limit];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        let text = String::from_utf8(buf).map_err(|_| SocketError::NotText(addr))?;
        log::trace!("[socket] {} ← {addr}: {}", self.local_addr, preview(&text));
        Ok((text, addr))
    }

    /// Discard datagrams already queued on the socket without waiting.
    ///
    /// Best effort: returns how many were dropped.
    pub fn drain(&self) -> usize {
        let mut buf = [0u8; DATA_RECV_LIMIT];
        let mut dropped = 0;
        while self.inner.try_recv_from(&mut buf).is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// [`recv_text`](Self::recv_text) bounded by `deadline`.
    pub async fn recv_text_timeout(
        &self,
        limit: usize,
        deadline: Duration,
    ) -> Result<(String, SocketAddr), SocketError> {
        match tokio::time::timeout(deadline, self.recv_text(limit)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(SocketError::Timeout(deadline)),
        }
    }
}

/// Truncate long datagrams for trace output.
fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(64)
        .map_or(text.len(), |(i, _)| i);
    &text[..end]
}
