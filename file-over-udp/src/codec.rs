//! Chunk codec: raw byte ranges ⇄ text-safe `DATA` payloads.
//!
//! Payloads are standard base64 (RFC 4648, padded).  Decoding always checks
//! the result against the range that was asked for; a chunk of the wrong
//! length is an error, never a short write.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

use crate::message::ChunkRequest;

/// Largest raw chunk the client requests and the server serves.
///
/// 1000 bytes encode to 1336 base64 characters; with the `DATA ` tag that
/// stays well inside the 4096-byte data receive cap.
pub const MAX_CHUNK: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("payload is not valid base64: {0}")]
    Base64(String),
    #[error("decoded {actual} bytes, expected {expected}")]
    LengthMismatch { expected: u64, actual: u64 },
}

/// Encode a chunk for the wire.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode `payload` and require exactly `request.len()` bytes.
pub fn decode_for(request: &ChunkRequest, payload: &str) -> Result<Vec<u8>, CodecError> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| CodecError::Base64(e.to_string()))?;
    let actual = bytes.len() as u64;
    if actual != request.len() {
        return Err(CodecError::LengthMismatch {
            expected: request.len(),
            actual,
        });
    }
    Ok(bytes)
}
