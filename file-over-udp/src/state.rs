//! Download progress and job outcome types.
//!
//! [`DownloadState`] is the per-file accounting the client transfer loop
//! drives.  Keeping the invariant checks here means the transfer loop cannot
//! advance progress by a chunk that does not exactly fill the range it asked
//! for.

use std::fmt;

use thiserror::Error;

use crate::message::ChunkRequest;

/// Progress of one file download.
///
/// ```text
///  0                total_received                file_size
///  ├──────────────────────┼─────────────────────────────┤
///  │  written to temp     │  still to request           │
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadState {
    file_size: u64,
    total_received: u64,
}

/// A chunk was offered that does not continue the download.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdvanceError {
    #[error("chunk starts at {start}, expected {expected_start}")]
    OutOfOrder { expected_start: u64, start: u64 },
    #[error("chunk ends at {end}, past file size {file_size}")]
    PastEnd { end: u64, file_size: u64 },
    #[error("chunk holds {actual} bytes, range needs {expected}")]
    LengthMismatch { expected: u64, actual: u64 },
}

impl DownloadState {
    pub fn new(file_size: u64) -> Self {
        Self {
            file_size,
            total_received: 0,
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    pub fn is_complete(&self) -> bool {
        self.total_received == self.file_size
    }

    /// The next range to request, at most `chunk` bytes, or `None` when done.
    pub fn next_range(&self, chunk: u64) -> Option<(u64, u64)> {
        if self.is_complete() {
            return None;
        }
        let start = self.total_received;
        let end = (start + chunk.max(1)).min(self.file_size) - 1;
        Some((start, end))
    }

    /// Account for `chunk_len` bytes received for `request`.
    ///
    /// Progress only moves when the chunk exactly fills the next range.
    pub fn advance(&mut self, request: &ChunkRequest, chunk_len: u64) -> Result<u64, AdvanceError> {
        if request.start != self.total_received {
            return Err(AdvanceError::OutOfOrder {
                expected_start: self.total_received,
                start: request.start,
            });
        }
        if request.end >= self.file_size {
            return Err(AdvanceError::PastEnd {
                end: request.end,
                file_size: self.file_size,
            });
        }
        if chunk_len != request.len() {
            return Err(AdvanceError::LengthMismatch {
                expected: request.len(),
                actual: chunk_len,
            });
        }
        self.total_received += chunk_len;
        Ok(self.total_received)
    }
}

/// How a single job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// File committed to its destination.
    Completed { bytes: u64 },
    /// Server answered `ERR <name> NOT_FOUND`.
    NotFound,
    /// Server answered `ERR INVALID_FORMAT`.
    Rejected,
    /// Control handshake exhausted its retries.
    NoResponse,
    /// Transfer gave up (retry exhaustion or local I/O).
    Failed { reason: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { bytes } => write!(f, "completed ({bytes} bytes)"),
            Self::NotFound => f.write_str("not found on server"),
            Self::Rejected => f.write_str("rejected as invalid"),
            Self::NoResponse => f.write_str("no response from server"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// One line of the scheduler's result list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub name: String,
    pub outcome: JobOutcome,
}
