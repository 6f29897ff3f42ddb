//! MySQL Audit Proxy
//!
//! This crate provides a transparent relay between MySQL clients and a MySQL
//! server. Relayed bytes are forwarded unchanged while a passive decoder
//! records executed queries and prepared statement lifecycle events.

// Error types and result
pub mod error;
pub use error::{DecodeError, ProxyError, Result};

// Configuration
pub mod config;
pub use config::ProxyConfig;

// Audit trail sinks
pub mod audit;
pub use audit::{open_sink, AuditSink, AuditTarget, MemorySink};

// Diagnostic dumps of relayed bytes
pub mod hexdump;

// Protocol-related modules
pub mod protocol;
pub use protocol::{DecodeEvent, Decoder, DecoderState, Direction};

// Per-connection relay
pub mod session;
pub use session::{Session, SessionStats};

// Server implementation
pub mod server;
pub use server::ProxyServer;
