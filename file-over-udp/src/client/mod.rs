//! Client side: control handshake, chunked pull loop, and the worker pool
//! that drives both for every queued file.

pub mod control;
pub mod scheduler;
pub mod transfer;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::codec::MAX_CHUNK;
use crate::message::MessageError;
use crate::socket::SocketError;
use crate::state::AdvanceError;
use crate::timer::TimerConfig;

pub use control::ControlSession;
pub use scheduler::Downloader;
pub use transfer::TransferSession;

/// Default number of concurrent download workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Everything a client needs to know to run downloads.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server's well-known control address.
    pub server: SocketAddr,
    /// Upper bound on concurrent workers.
    pub workers: usize,
    /// Directory completed files are committed into.
    pub dest_dir: PathBuf,
    /// Raw bytes per chunk request.
    pub chunk_size: u64,
    pub timers: TimerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: SocketAddr::from(([127, 0, 0, 1], 9000)),
            workers: DEFAULT_WORKERS,
            dest_dir: PathBuf::from("."),
            chunk_size: MAX_CHUNK,
            timers: TimerConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("invalid message: {0}")]
    Message(#[from] MessageError),
    #[error(transparent)]
    Progress(#[from] AdvanceError),
    /// The control handshake exhausted its retries.
    #[error("no response after {attempts} attempts")]
    NoResponse { attempts: u32 },
    /// One chunk exhausted its retries.
    #[error("chunk {start}..={end} failed after {attempts} attempts")]
    ChunkExhausted { start: u64, end: u64, attempts: u32 },
    /// The name cannot be mapped to a path under the destination directory.
    #[error("refusing to write outside destination directory: {0:?}")]
    UnsafeName(String),
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    pub(crate) fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Parse a line-delimited job list: one file name per line, surrounding
/// whitespace trimmed, blank lines skipped.
pub fn parse_job_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read and parse a job list file.
pub async fn read_job_list(path: &Path) -> Result<Vec<String>, ClientError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ClientError::io("read", path, e))?;
    Ok(parse_job_list(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_list_skips_blank_lines_and_trims() {
        let jobs = parse_job_list("a.txt\n\n  b.bin  \r\n\t\nc\n");
        assert_eq!(jobs, vec!["a.txt", "b.bin", "c"]);
    }

    #[test]
    fn job_list_empty_input() {
        assert!(parse_job_list("").is_empty());
        assert!(parse_job_list("\n \n").is_empty());
    }

    #[tokio::test]
    async fn missing_job_list_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_job_list(&dir.path().join("nope.txt")).await.unwrap_err();
        assert!(matches!(err, ClientError::Io { op: "read", .. }));
    }
}
