//! Well-known-port request dispatcher.
//!
//! One receive loop on the control socket.  Every valid `DOWNLOAD` for a
//! servable file gets a freshly leased port, a bound session socket and an
//! `OK`, then its [`ServerSession`] is spawned and the loop goes straight back
//! to listening.  Nothing that happens to a single datagram ends the loop.
//!
//! A retried or duplicated `DOWNLOAD` from the same client socket for the same
//! name is answered with the `OK` it already got, as long as that session is
//! still running; it does not lease a second port.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use tokio::fs::File;
use tokio::time::Instant;

use crate::message::{ControlResponse, DownloadRequest, MessageError};
use crate::server::{
    servable_path, PortAllocator, PortLease, ServerConfig, ServerError, ServerSession,
};
use crate::socket::{Socket, SocketError, CONTROL_RECV_LIMIT};

/// Session sockets tried per request before giving up on it.
const BIND_ATTEMPTS: usize = 8;

/// An `OK` already sent, tied to the session it announced.
struct Grant {
    size: u64,
    port: u16,
    granted: Instant,
    session: Weak<()>,
}

impl Grant {
    fn is_live(&self, window: std::time::Duration) -> bool {
        self.granted.elapsed() < window && self.session.strong_count() > 0
    }
}

pub struct Dispatcher {
    socket: Socket,
    config: Arc<ServerConfig>,
    ports: PortAllocator,
    grants: HashMap<(SocketAddr, String), Grant>,
}

impl Dispatcher {
    /// Bind the control socket on `config.bind`.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let socket = Socket::bind(config.bind).await?;
        let ports = PortAllocator::new(config.port_range.clone());
        log::info!(
            "[dispatch] listening on {}, serving {}, session ports {:?}",
            socket.local_addr,
            config.root.display(),
            config.port_range
        );
        Ok(Self {
            socket,
            config: Arc::new(config),
            ports,
            grants: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Handle to the session port pool, shared with running sessions.
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Serve forever.
    pub async fn run(mut self) {
        loop {
            let (text, from) = match self.socket.recv_text(CONTROL_RECV_LIMIT).await {
                Ok(datagram) => datagram,
                Err(SocketError::NotText(from)) => {
                    log::debug!("[dispatch] dropping binary datagram from {from}");
                    continue;
                }
                Err(e) => {
                    log::warn!("[dispatch] receive failed: {e}");
                    continue;
                }
            };
            if let Err(e) = self.handle(&text, from).await {
                log::warn!("[dispatch] {from}: {e}");
            }
        }
    }

    async fn handle(&mut self, text: &str, from: SocketAddr) -> Result<(), ServerError> {
        let request = match DownloadRequest::decode(text) {
            Ok(request) => request,
            Err(MessageError::Empty | MessageError::UnknownTag(_)) => {
                log::debug!("[dispatch] dropping {text:?} from {from}");
                return Ok(());
            }
            Err(e) => {
                log::info!("[dispatch] {from}: {e}");
                return self.reply(&ControlResponse::InvalidFormat, from).await;
            }
        };
        let name = request.name;
        log::info!("[dispatch] {from} requests {name:?}");

        let window = self.config.idle_timeout;
        self.grants.retain(|_, grant| grant.is_live(window));
        if let Some(grant) = self.grants.get(&(from, name.clone())) {
            log::debug!("[dispatch] {from}: repeating grant of port {}", grant.port);
            let (size, port) = (grant.size, grant.port);
            return self.reply(&ControlResponse::Ok { name, size, port }, from).await;
        }

        let Some((file, size)) = self.open(&name).await else {
            return self.reply(&ControlResponse::NotFound { name }, from).await;
        };

        let (socket, lease) = self.bind_session().await?;
        let port = lease.port();
        let session = ServerSession::new(
            socket,
            lease,
            name.clone(),
            file,
            size,
            from.ip(),
            &self.config,
        );
        let grant = Grant {
            size,
            port,
            granted: Instant::now(),
            session: session.liveness(),
        };
        // The session socket is already bound, so a client acting on the OK
        // immediately cannot race ahead of it.
        self.reply(&ControlResponse::Ok { name: name.clone(), size, port }, from)
            .await?;
        self.grants.insert((from, name), grant);
        tokio::spawn(session.run());
        Ok(())
    }

    async fn reply(&self, response: &ControlResponse, to: SocketAddr) -> Result<(), ServerError> {
        self.socket.send_text(&response.encode(), to).await?;
        log::debug!("[dispatch] → {to}: {response}");
        Ok(())
    }

    /// Open `name` if it is a regular file under the root.
    async fn open(&self, name: &str) -> Option<(File, u64)> {
        let path = servable_path(&self.config.root, name)?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                log::debug!("[dispatch] open {}: {e}", path.display());
                return None;
            }
        };
        match file.metadata().await {
            Ok(meta) if meta.is_file() => Some((file, meta.len())),
            Ok(_) => {
                log::debug!("[dispatch] {} is not a regular file", path.display());
                None
            }
            Err(e) => {
                log::warn!("[dispatch] stat {}: {e}", path.display());
                None
            }
        }
    }

    /// Lease a port and bind the session socket on it.
    ///
    /// A leased port can still be taken by another process; such leases are
    /// held until the search ends so the same port is not drawn twice.
    async fn bind_session(&self) -> Result<(Socket, PortLease), ServerError> {
        let mut rejected = Vec::new();
        for _ in 0..BIND_ATTEMPTS {
            let Some(lease) = self.ports.lease() else {
                break;
            };
            let addr = SocketAddr::new(self.config.bind.ip(), lease.port());
            match Socket::bind(addr).await {
                Ok(socket) => return Ok((socket, lease)),
                Err(e) => {
                    log::debug!("[dispatch] cannot bind {addr}: {e}");
                    rejected.push(lease);
                }
            }
        }
        Err(ServerError::NoFreePort(self.config.port_range.clone()))
    }
}
