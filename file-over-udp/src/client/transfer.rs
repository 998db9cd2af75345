//! Client transfer session: stop-and-wait chunk pulls into a private temp
//! file, then an atomic commit.
//!
//! # Stop-and-wait contract
//! - Exactly one chunk request is outstanding at any moment.
//! - Ranges are requested in increasing, non-overlapping order.
//! - A timeout, an undecodable `DATA`, or a `DATA` of the wrong length is a
//!   failed attempt: the same range is requested again and progress does not
//!   move.
//! - After the per-chunk attempt budget is spent the whole transfer fails.
//! - Every range is pulled through a freshly bound socket.  `DATA` carries no
//!   offset, so a late duplicate for an earlier range must not be able to
//!   reach the socket waiting on the current one; it lands on a closed port
//!   instead.  Retries of the same range reuse that range's socket.
//!
//! # Visibility contract
//! - Bytes are written to `<name>.<random>.part` beside the destination.
//! - Success renames the temp file over the destination in one step.
//! - Failure deletes the temp file; the destination is never touched.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use rand::Rng;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use crate::client::{ClientConfig, ClientError};
use crate::codec::{self, MAX_CHUNK};
use crate::message::{relative_path, ChunkRequest, ChunkResponse};
use crate::socket::{Socket, SocketError, DATA_RECV_LIMIT};
use crate::state::DownloadState;
use crate::timer::TimerConfig;

/// Pulls one file from a server transfer session.
pub struct TransferSession {
    peer: SocketAddr,
    name: String,
    state: DownloadState,
    chunk_size: u64,
    timers: TimerConfig,
}

impl TransferSession {
    /// Prepare to pull `name` (`file_size` bytes) from the server session at
    /// `peer`.  Chunk sizes above `MAX_CHUNK` would be refused by the server
    /// and are clamped.
    pub fn new(name: &str, file_size: u64, peer: SocketAddr, config: &ClientConfig) -> Self {
        log::debug!("[transfer] {name}: pulling {file_size} bytes from {peer}");
        Self {
            peer,
            name: name.to_string(),
            state: DownloadState::new(file_size),
            chunk_size: config.chunk_size.clamp(1, MAX_CHUNK),
            timers: config.timers.clone(),
        }
    }

    /// Download into `dest_dir/<name>` and commit.  Returns the byte count.
    pub async fn run(mut self, dest_dir: &Path) -> Result<u64, ClientError> {
        let relative =
            relative_path(&self.name).ok_or_else(|| ClientError::UnsafeName(self.name.clone()))?;
        let dest = dest_dir.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ClientError::io("create directory", parent, e))?;
        }
        let temp = temp_path(&dest);

        let result = match self.pull_into(&temp).await {
            Ok(()) => commit(&temp, &dest).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                log::info!(
                    "[transfer] {}: committed {} bytes to {}",
                    self.name,
                    self.state.total_received(),
                    dest.display()
                );
                Ok(self.state.total_received())
            }
            Err(e) => {
                discard(&temp).await;
                Err(e)
            }
        }
    }

    async fn pull_into(&mut self, temp: &Path) -> Result<(), ClientError> {
        let mut file = File::create(temp)
            .await
            .map_err(|e| ClientError::io("create", temp, e))?;

        while let Some((start, end)) = self.state.next_range(self.chunk_size) {
            let request = ChunkRequest::new(self.name.as_str(), start, end)?;
            let socket = Socket::bind_for(self.peer).await?;
            let bytes = self.fetch(&socket, &request).await?;
            file.write_all(&bytes)
                .await
                .map_err(|e| ClientError::io("write", temp, e))?;
            self.state.advance(&request, bytes.len() as u64)?;
            log::debug!(
                "[transfer] {}: {}/{} bytes",
                self.name,
                self.state.total_received(),
                self.state.file_size()
            );
        }

        file.flush()
            .await
            .map_err(|e| ClientError::io("flush", temp, e))?;
        file.sync_all()
            .await
            .map_err(|e| ClientError::io("sync", temp, e))?;
        Ok(())
    }

    /// Request one range until a `DATA` of exactly the right length arrives.
    async fn fetch(&self, socket: &Socket, request: &ChunkRequest) -> Result<Vec<u8>, ClientError> {
        let message = request.encode();
        let attempts = self.timers.data_attempts.max(1);

        // Nothing should be queued on a fresh socket; drop it if there is.
        let stale = socket.drain();
        if stale > 0 {
            log::debug!("[transfer] {}: dropped {stale} stale datagram(s)", self.name);
        }

        for attempt in 1..=attempts {
            socket.send_text(&message, self.peer).await?;
            let deadline = Instant::now() + self.timers.data_timeout;

            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match socket.recv_text_timeout(DATA_RECV_LIMIT, remaining).await {
                    Ok((_, from)) if from != self.peer => {
                        log::debug!("[transfer] {}: ignoring datagram from {from}", self.name);
                    }
                    Ok((text, _)) => {
                        let decoded = ChunkResponse::decode(&text)
                            .map_err(|e| e.to_string())
                            .and_then(|data| {
                                codec::decode_for(request, &data.payload).map_err(|e| e.to_string())
                            });
                        match decoded {
                            Ok(bytes) => return Ok(bytes),
                            Err(reason) => {
                                log::warn!(
                                    "[transfer] {}: bad reply for {}..={} ({reason}), attempt {attempt}/{attempts}",
                                    self.name,
                                    request.start,
                                    request.end
                                );
                                break;
                            }
                        }
                    }
                    Err(SocketError::NotText(from)) => {
                        log::debug!("[transfer] {}: ignoring binary datagram from {from}", self.name);
                    }
                    Err(SocketError::Timeout(waited)) => {
                        log::warn!(
                            "[transfer] {}: chunk {}..={} timed out after {waited:?}, attempt {attempt}/{attempts}",
                            self.name,
                            request.start,
                            request.end
                        );
                        break;
                    }
                    Err(e) if e.is_transient() => {
                        log::warn!(
                            "[transfer] {}: chunk {}..={}: {e}, attempt {attempt}/{attempts}",
                            self.name,
                            request.start,
                            request.end
                        );
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Err(ClientError::ChunkExhausted {
            start: request.start,
            end: request.end,
            attempts,
        })
    }
}

/// `<dest>.<random hex>.part` in the destination's directory.
fn temp_path(dest: &Path) -> PathBuf {
    let suffix: u32 = rand::thread_rng().gen();
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{suffix:08x}.part"));
    dest.with_file_name(name)
}

/// Rename `temp` over `dest`.  `rename` replaces an existing destination
/// atomically, so readers see either the old file or the new one.
async fn commit(temp: &Path, dest: &Path) -> Result<(), ClientError> {
    fs::rename(temp, dest)
        .await
        .map_err(|e| ClientError::io("rename", dest, e))
}

async fn discard(temp: &Path) {
    match fs::remove_file(temp).await {
        Ok(()) => log::debug!("[transfer] removed {}", temp.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("[transfer] could not remove {}: {e}", temp.display()),
    }
}
