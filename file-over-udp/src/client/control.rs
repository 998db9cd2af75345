//! Control-channel handshake with bounded retry.
//!
//! A [`ControlSession`] owns its own socket.  Sharing one socket between
//! concurrent workers would let worker A read worker B's `OK`, and would have
//! them fight over a single timeout; here every job binds a fresh endpoint, so
//! a response can only reach the session that asked for it.
//!
//! # Retry contract
//! - Send, then wait up to the current timeout for an *acceptable* reply.
//! - Datagrams from other addresses, or that the predicate rejects, are
//!   ignored; the wait continues against the same deadline.
//! - On timeout, widen the wait (see [`crate::timer::Backoff`]) and resend.
//! - After the last attempt, return [`ClientError::NoResponse`].

use std::net::SocketAddr;

use tokio::time::Instant;

use crate::client::ClientError;
use crate::message::{ControlResponse, DownloadRequest};
use crate::socket::{Socket, SocketError, CONTROL_RECV_LIMIT};
use crate::timer::{Backoff, TimerConfig};

pub struct ControlSession {
    socket: Socket,
    server: SocketAddr,
    timers: TimerConfig,
}

impl ControlSession {
    /// Bind a private socket for talking to `server`.
    pub async fn open(server: SocketAddr, timers: TimerConfig) -> Result<Self, ClientError> {
        let socket = Socket::bind_for(server).await?;
        log::debug!("[control] {} bound for {server}", socket.local_addr);
        Ok(Self {
            socket,
            server,
            timers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Send `message` until a reply satisfies `accept` or retries run out.
    ///
    /// `accept` maps raw reply text to `Some(value)` when it answers this
    /// request and `None` when it should be ignored.
    pub async fn request<T, F>(&self, message: &str, mut accept: F) -> Result<T, ClientError>
    where
        F: FnMut(&str) -> Option<T>,
    {
        let mut backoff = Backoff::control(&self.timers);
        let mut attempt = 1u32;

        loop {
            self.socket.send_text(message, self.server).await?;
            let deadline = Instant::now() + backoff.current();

            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self
                    .socket
                    .recv_text_timeout(CONTROL_RECV_LIMIT, remaining)
                    .await
                {
                    Ok((text, from)) if from != self.server => {
                        log::debug!("[control] ignoring datagram from {from}: {text:?}");
                    }
                    Ok((text, _)) => match accept(&text) {
                        Some(value) => return Ok(value),
                        None => log::debug!("[control] ignoring unrelated reply {text:?}"),
                    },
                    Err(SocketError::NotText(from)) => {
                        log::debug!("[control] ignoring binary datagram from {from}");
                    }
                    Err(SocketError::Timeout(waited)) => {
                        log::warn!(
                            "[control] {message:?}: no reply within {waited:?} (attempt {attempt}/{})",
                            self.timers.control_attempts
                        );
                        break;
                    }
                    Err(e) if e.is_transient() => {
                        log::warn!("[control] {message:?}: {e} (attempt {attempt})");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if backoff.on_timeout().is_none() {
                return Err(ClientError::NoResponse { attempts: attempt });
            }
            attempt += 1;
            log::debug!(
                "[control] retrying {message:?} with timeout {:?}",
                backoff.current()
            );
        }
    }

    /// `DOWNLOAD <name>` → the server's typed answer for that name.
    pub async fn download_request(&self, name: &str) -> Result<ControlResponse, ClientError> {
        let request = DownloadRequest::new(name)?;
        self.request(&request.encode(), |text| {
            ControlResponse::decode(text)
                .ok()
                .filter(|response| response.answers(name))
        })
        .await
    }
}
