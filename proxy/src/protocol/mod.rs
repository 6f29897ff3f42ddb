//! MySQL client/server protocol observation
//!
//! This module provides bounds-checked framing for the MySQL wire protocol
//! and the per-session decoder that turns relayed bytes into audit events.

/// Packet header and frame parsing
pub mod packet;

/// Command-phase command bytes
pub mod command;

/// Prepared statement table
pub mod statement;

/// Per-session decoder state machine
pub mod decoder;

// Re-export common types
pub use self::packet::{Frame, PacketHeader, PayloadReader, PACKET_HEADER_SIZE};
pub use self::command::Command;
pub use self::statement::{PreparedStatement, PreparedStatementTable};
pub use self::decoder::{DecodeEvent, Decoder, DecoderState, Direction, HANDSHAKE_PACKETS};
