//! Server side: the well-known-port dispatcher and the per-transfer sessions
//! it spawns.

pub mod dispatcher;
pub mod ports;
pub mod session;

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::message::relative_path;
use crate::socket::SocketError;

pub use dispatcher::Dispatcher;
pub use ports::{PortAllocator, PortLease, DEFAULT_PORT_RANGE};
pub use session::{ServerSession, SessionEnd, SessionSummary};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Well-known control address.
    pub bind: SocketAddr,
    /// Directory that servable names are resolved against.
    pub root: PathBuf,
    /// Ports handed out to transfer sessions.
    pub port_range: RangeInclusive<u16>,
    /// A session with no valid request for this long is abandoned.
    pub idle_timeout: Duration,
    /// After the last byte range is served, keep answering repeats this long.
    pub linger: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 9000)),
            root: PathBuf::from("."),
            port_range: DEFAULT_PORT_RANGE,
            idle_timeout: Duration::from_secs(60),
            linger: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("no free session port in {0:?}")]
    NoFreePort(RangeInclusive<u16>),
}

/// Map a requested name to a path under `root`, if it is allowed to be one.
pub fn servable_path(root: &Path, name: &str) -> Option<PathBuf> {
    relative_path(name).map(|relative| root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servable_path_joins_under_root() {
        let root = Path::new("/srv/files");
        assert_eq!(
            servable_path(root, "a/b.txt"),
            Some(PathBuf::from("/srv/files/a/b.txt"))
        );
        assert_eq!(servable_path(root, "../secret"), None);
    }

    #[test]
    fn default_config_matches_protocol_constants() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind.port(), 9000);
        assert_eq!(cfg.port_range, 50000..=51000);
        assert!(cfg.linger < cfg.idle_timeout);
    }
}
