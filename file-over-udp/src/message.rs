//! Wire-format definitions for control and data messages.
//!
//! Every datagram exchanged between peers is a single line of UTF-8 text made
//! of whitespace-separated tokens.  This module is responsible for:
//! - Defining one type per message kind.
//! - Encoding a message into the exact text that goes on the wire.
//! - Decoding received text with a strict fixed grammar, rejecting missing
//!   tokens, extra tokens, wrong keywords and non-decimal numbers.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Grammar
//!
//! ```text
//! control  client → server   DOWNLOAD <name>
//!          server → client   OK <name> SIZE <bytes> PORT <port>
//!                            ERR <name> NOT_FOUND
//!                            ERR INVALID_FORMAT
//! data     client → server   FILE <name> GET START <s> END <e>
//!          server → client   DATA <base64>
//! ```
//!
//! `<name>` is any non-empty token without whitespace.  Offsets are inclusive.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Message tags and fixed keywords as they appear on the wire.
pub mod tags {
    pub const DOWNLOAD: &str = "DOWNLOAD";
    pub const OK: &str = "OK";
    pub const ERR: &str = "ERR";
    pub const SIZE: &str = "SIZE";
    pub const PORT: &str = "PORT";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INVALID_FORMAT: &str = "INVALID_FORMAT";
    pub const FILE: &str = "FILE";
    pub const GET: &str = "GET";
    pub const START: &str = "START";
    pub const END: &str = "END";
    pub const DATA: &str = "DATA";
}

/// Errors that can arise when parsing or building a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// The datagram contained no tokens at all.
    #[error("empty message")]
    Empty,
    /// The first token is not the tag this parser expects.
    #[error("unexpected message tag {0:?}")]
    UnknownTag(String),
    /// Right tag, wrong number of tokens.
    #[error("{tag} expects {expected} tokens, found {found}")]
    Arity {
        tag: &'static str,
        expected: usize,
        found: usize,
    },
    /// A fixed keyword was missing or misspelled.
    #[error("expected keyword {expected}, found {found:?}")]
    Keyword {
        expected: &'static str,
        found: String,
    },
    /// A numeric field did not parse as an unsigned decimal.
    #[error("field {field} is not a valid number: {value:?}")]
    Number { field: &'static str, value: String },
    /// A file name was empty or contained whitespace.
    #[error("invalid file name {0:?}")]
    InvalidName(String),
    /// `start > end` in a chunk request.
    #[error("invalid byte range {start}..={end}")]
    InvalidRange { start: u64, end: u64 },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn tokens(text: &str) -> Vec<&str> {
    text.split_ascii_whitespace().collect()
}

fn expect_arity(tag: &'static str, toks: &[&str], expected: usize) -> Result<(), MessageError> {
    if toks.len() == expected {
        Ok(())
    } else {
        Err(MessageError::Arity {
            tag,
            expected,
            found: toks.len(),
        })
    }
}

fn expect_keyword(expected: &'static str, found: &str) -> Result<(), MessageError> {
    if found == expected {
        Ok(())
    } else {
        Err(MessageError::Keyword {
            expected,
            found: found.to_string(),
        })
    }
}

fn leading_tag<'a>(toks: &[&'a str]) -> Result<&'a str, MessageError> {
    toks.first().copied().ok_or(MessageError::Empty)
}

/// Decimal only: `u64::from_str` would also accept a leading `+`.
fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, MessageError> {
    let invalid = || MessageError::Number {
        field,
        value: value.to_string(),
    };
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse().map_err(|_| invalid())
}

/// Validate a file name token for use on the wire.
pub fn validate_name(name: &str) -> Result<(), MessageError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(MessageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Interpret a name token as a path relative to some root directory.
///
/// Returns `None` for absolute paths, `..` components, or names that reduce
/// to nothing, so neither side ever touches a file outside its root.
pub fn relative_path(name: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

// ---------------------------------------------------------------------------
// Control channel
// ---------------------------------------------------------------------------

/// `DOWNLOAD <name>`: the only control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub name: String,
}

impl DownloadRequest {
    pub fn new(name: impl Into<String>) -> Result<Self, MessageError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name })
    }

    pub fn encode(&self) -> String {
        format!("{} {}", tags::DOWNLOAD, self.name)
    }

    /// Parse a control request.
    ///
    /// [`MessageError::UnknownTag`] / [`MessageError::Empty`] mean the datagram
    /// is not a download request at all; any other error means it is a
    /// malformed one and deserves `ERR INVALID_FORMAT`.
    pub fn decode(text: &str) -> Result<Self, MessageError> {
        let toks = tokens(text);
        let tag = leading_tag(&toks)?;
        if tag != tags::DOWNLOAD {
            return Err(MessageError::UnknownTag(tag.to_string()));
        }
        expect_arity(tags::DOWNLOAD, &toks, 2)?;
        Ok(Self {
            name: toks[1].to_string(),
        })
    }
}

/// Server reply to a [`DownloadRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    /// `OK <name> SIZE <size> PORT <port>`
    Ok { name: String, size: u64, port: u16 },
    /// `ERR <name> NOT_FOUND`
    NotFound { name: String },
    /// `ERR INVALID_FORMAT`
    InvalidFormat,
}

impl ControlResponse {
    pub fn encode(&self) -> String {
        match self {
            Self::Ok { name, size, port } => format!(
                "{} {name} {} {size} {} {port}",
                tags::OK,
                tags::SIZE,
                tags::PORT
            ),
            Self::NotFound { name } => format!("{} {name} {}", tags::ERR, tags::NOT_FOUND),
            Self::InvalidFormat => format!("{} {}", tags::ERR, tags::INVALID_FORMAT),
        }
    }

    pub fn decode(text: &str) -> Result<Self, MessageError> {
        let toks = tokens(text);
        match leading_tag(&toks)? {
            tags::OK => {
                expect_arity(tags::OK, &toks, 6)?;
                expect_keyword(tags::SIZE, toks[2])?;
                expect_keyword(tags::PORT, toks[4])?;
                Ok(Self::Ok {
                    name: toks[1].to_string(),
                    size: parse_number("SIZE", toks[3])?,
                    port: parse_number("PORT", toks[5])?,
                })
            }
            tags::ERR => match toks.len() {
                2 => {
                    expect_keyword(tags::INVALID_FORMAT, toks[1])?;
                    Ok(Self::InvalidFormat)
                }
                3 => {
                    expect_keyword(tags::NOT_FOUND, toks[2])?;
                    Ok(Self::NotFound {
                        name: toks[1].to_string(),
                    })
                }
                found => Err(MessageError::Arity {
                    tag: tags::ERR,
                    expected: 3,
                    found,
                }),
            },
            other => Err(MessageError::UnknownTag(other.to_string())),
        }
    }

    /// `true` when this response answers a request for `name`.
    ///
    /// `ERR INVALID_FORMAT` carries no name and answers any request.
    pub fn answers(&self, name: &str) -> bool {
        match self {
            Self::Ok { name: n, .. } | Self::NotFound { name: n } => n == name,
            Self::InvalidFormat => true,
        }
    }
}

impl fmt::Display for ControlResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

// ---------------------------------------------------------------------------
// Data channel
// ---------------------------------------------------------------------------

/// `FILE <name> GET START <s> END <e>`: one inclusive byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl ChunkRequest {
    /// Build a request for `start..=end`.  Rejects `start > end`.
    pub fn new(name: impl Into<String>, start: u64, end: u64) -> Result<Self, MessageError> {
        let name = name.into();
        validate_name(&name)?;
        if start > end {
            return Err(MessageError::InvalidRange { start, end });
        }
        Ok(Self { name, start, end })
    }

    /// Number of bytes covered by the range.  Never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {} {} {} {}",
            tags::FILE,
            self.name,
            tags::GET,
            tags::START,
            self.start,
            tags::END,
            self.end
        )
    }

    pub fn decode(text: &str) -> Result<Self, MessageError> {
        let toks = tokens(text);
        let tag = leading_tag(&toks)?;
        if tag != tags::FILE {
            return Err(MessageError::UnknownTag(tag.to_string()));
        }
        expect_arity(tags::FILE, &toks, 7)?;
        expect_keyword(tags::GET, toks[2])?;
        expect_keyword(tags::START, toks[3])?;
        expect_keyword(tags::END, toks[5])?;
        let start = parse_number("START", toks[4])?;
        let end = parse_number("END", toks[6])?;
        Self::new(toks[1], start, end)
    }
}

/// `DATA <encoded>`: reply to a [`ChunkRequest`].
///
/// `payload` is the text-safe encoding produced by [`crate::codec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResponse {
    pub payload: String,
}

impl ChunkResponse {
    pub fn encode(&self) -> String {
        format!("{} {}", tags::DATA, self.payload)
    }

    pub fn decode(text: &str) -> Result<Self, MessageError> {
        let toks = tokens(text);
        let tag = leading_tag(&toks)?;
        if tag != tags::DATA {
            return Err(MessageError::UnknownTag(tag.to_string()));
        }
        expect_arity(tags::DATA, &toks, 2)?;
        Ok(Self {
            payload: toks[1].to_string(),
        })
    }
}
