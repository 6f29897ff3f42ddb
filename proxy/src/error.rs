//! Error types for the audit proxy
//!
//! Transport and configuration failures are reported through [`ProxyError`].
//! Decoding failures are frame-local and reported through [`DecodeError`];
//! they never leave the decoder as anything but a diagnostic event.

use std::io;
use std::net::AddrParseError;
use std::num::ParseIntError;
use thiserror::Error;

/// Result type for the proxy
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Error type for the proxy
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address parsing error
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] AddrParseError),

    /// Integer parsing error
    #[error("Integer parsing error: {0}")]
    ParseInt(#[from] ParseIntError),

    /// Upstream connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Listener error
    #[error("Server error: {0}")]
    Server(String),

    /// Audit sink could not be opened
    #[error("Audit sink error: {0}")]
    AuditSink(String),
}

/// Frame-local protocol decoding error
///
/// Aborts decoding of the current frame only. The relayed bytes are
/// forwarded regardless.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer than four bytes were available for the packet header
    #[error("truncated header: {available} bytes available")]
    TruncatedHeader { available: usize },

    /// The header declares more payload than the chunk carries
    #[error("truncated frame: payload length {declared}, {available} bytes available")]
    TruncatedFrame { declared: usize, available: usize },

    /// A command frame with no command byte
    #[error("empty payload")]
    EmptyPayload,

    /// A field ran past the end of the payload
    #[error("insufficient data for {field}: need {needed} bytes, {available} available")]
    Insufficient {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// Statement id not present in the prepared statement table
    #[error("unknown statement id {0}")]
    UnknownStatement(u32),

    /// A prepare response arrived with no prepare request outstanding
    #[error("prepare response without a pending prepare request")]
    MissingPendingPrepare,
}
