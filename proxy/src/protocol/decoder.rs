//! Passive command-protocol decoder
//!
//! The decoder observes copies of the bytes relayed in both directions of a
//! session and turns them into audit events. It never sees the sockets and
//! never alters the relayed bytes. Each relayed chunk is one decode unit: the
//! leading frame of the chunk is interpreted and anything after it is left
//! alone, so a frame split across two reads is not reassembled.
//!
//! The first [`HANDSHAKE_PACKETS`] chunks of a session are counted but not
//! decoded, which coarsely skips the connection handshake. After that, a
//! header with sequence id zero always resynchronizes the decoder to
//! [`DecoderState::AwaitingCommand`].

use crate::error::DecodeError;
use crate::protocol::command::Command;
use crate::protocol::packet::{Frame, PayloadReader};
use crate::protocol::statement::{PreparedStatement, PreparedStatementTable};
use log::{debug, trace};
use std::fmt;

/// Number of packets (summed over both directions) skipped before decoding starts
pub const HANDSHAKE_PACKETS: usize = 3;

/// Decoder state, shared by both traffic directions of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderState {
    /// Waiting for a client command
    AwaitingCommand,

    /// A query (or long data chunk) was sent; response is not decoded
    AwaitingQueryResponse,

    /// A prepare request is outstanding
    AwaitingPrepareResponse,

    /// A prepared statement was executed; response is not decoded
    AwaitingExecuteResponse,
}

/// Which way a relayed chunk travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to upstream server
    ClientToServer,

    /// Upstream server to client
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("client->server"),
            Direction::ServerToClient => f.write_str("server->client"),
        }
    }
}

/// Event produced by decoding a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// COM_QUERY
    QueryExecuted { sql: String },

    /// COM_STMT_PREPARE
    PrepareRequested { sql: String },

    /// Successful prepare response registered a statement
    StatementPrepared { id: u32, param_count: u16 },

    /// COM_STMT_SEND_LONG_DATA
    LongData,

    /// COM_STMT_EXECUTE against a known statement
    StatementExecuted { id: u32, sql: String },

    /// COM_STMT_CLOSE against a known statement
    StatementClosed { id: u32, sql: String },

    /// Decoding of the frame was aborted
    Diagnostic(DecodeError),
}

impl DecodeEvent {
    /// Whether this event reports a decode failure
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, DecodeEvent::Diagnostic(_))
    }
}

impl fmt::Display for DecodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeEvent::QueryExecuted { sql } => write!(f, "Execute query: {}", sql),
            DecodeEvent::PrepareRequested { sql } => write!(f, "Prepare statement: {}", sql),
            DecodeEvent::StatementPrepared { id, param_count } => {
                write!(f, "Statement prepared: id={} params={}", id, param_count)
            }
            DecodeEvent::LongData => f.write_str("COM_STMT_SEND_LONG_DATA"),
            DecodeEvent::StatementExecuted { sql, .. } => {
                write!(f, "Execute prepared statement: {}", sql)
            }
            DecodeEvent::StatementClosed { sql, .. } => {
                write!(f, "Deallocate prepared statement: {}", sql)
            }
            DecodeEvent::Diagnostic(err) => write!(f, "Decode error: {}", err),
        }
    }
}

/// Per-session protocol decoder
#[derive(Debug)]
pub struct Decoder {
    /// Current protocol phase
    state: DecoderState,

    /// Statements registered by prepare responses
    statements: PreparedStatementTable,

    /// Text of the outstanding prepare request
    pending_prepare: Option<String>,

    /// Packets seen during the handshake skip
    handshake_packets: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Create a decoder for a fresh session
    pub fn new() -> Self {
        Self {
            state: DecoderState::AwaitingCommand,
            statements: PreparedStatementTable::new(),
            pending_prepare: None,
            handshake_packets: 0,
        }
    }

    /// Current protocol phase
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Statements known to this session
    pub fn statements(&self) -> &PreparedStatementTable {
        &self.statements
    }

    /// Text of the outstanding prepare request, if any
    pub fn pending_prepare(&self) -> Option<&str> {
        self.pending_prepare.as_deref()
    }

    /// Whether the handshake skip is over
    pub fn handshake_complete(&self) -> bool {
        self.handshake_packets >= HANDSHAKE_PACKETS
    }

    /// Observe one relayed chunk and return the events it produced.
    ///
    /// Never fails: a malformed frame yields a [`DecodeEvent::Diagnostic`]
    /// and leaves the session decodable.
    pub fn decode(&mut self, direction: Direction, data: &[u8]) -> Vec<DecodeEvent> {
        if !self.handshake_complete() {
            self.handshake_packets += 1;
            trace!(
                "Skipping handshake packet {}/{} ({}, {} bytes)",
                self.handshake_packets,
                HANDSHAKE_PACKETS,
                direction,
                data.len()
            );
            return Vec::new();
        }

        let mut events = Vec::new();
        if let Err(e) = self.decode_frame(data, &mut events) {
            debug!("Aborted decoding of {} frame: {}", direction, e);
            events.push(DecodeEvent::Diagnostic(e));
        }
        events
    }

    fn decode_frame(&mut self, data: &[u8], events: &mut Vec<DecodeEvent>) -> Result<(), DecodeError> {
        let frame = Frame::parse(data)?;

        if frame.header.starts_command() {
            self.state = DecoderState::AwaitingCommand;
        }

        match self.state {
            DecoderState::AwaitingCommand => self.decode_command(frame.payload, events),
            DecoderState::AwaitingPrepareResponse => {
                self.decode_prepare_response(frame.payload, events)
            }
            DecoderState::AwaitingQueryResponse | DecoderState::AwaitingExecuteResponse => Ok(()),
        }
    }

    fn decode_command(&mut self, payload: &[u8], events: &mut Vec<DecodeEvent>) -> Result<(), DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }

        let mut reader = PayloadReader::new(payload);
        let command = match Command::try_from(reader.read_u8("command")?) {
            Ok(command) => command,
            Err(byte) => {
                trace!("Ignoring unknown command byte 0x{:02x}", byte);
                return Ok(());
            }
        };

        match command {
            Command::Query => {
                let sql = reader.read_rest_string();
                events.push(DecodeEvent::QueryExecuted { sql });
                self.state = DecoderState::AwaitingQueryResponse;
            }
            Command::StmtPrepare => {
                let sql = reader.read_rest_string();
                self.pending_prepare = Some(sql.clone());
                events.push(DecodeEvent::PrepareRequested { sql });
                self.state = DecoderState::AwaitingPrepareResponse;
            }
            Command::StmtSendLongData => {
                events.push(DecodeEvent::LongData);
                self.state = DecoderState::AwaitingQueryResponse;
            }
            Command::StmtExecute => {
                let id = reader.read_u32("statement id")?;
                self.state = DecoderState::AwaitingExecuteResponse;

                let statement = self
                    .statements
                    .get(id)
                    .ok_or(DecodeError::UnknownStatement(id))?;
                events.push(DecodeEvent::StatementExecuted {
                    id,
                    sql: statement.sql.clone(),
                });

                skip_execute_params(&mut reader, statement)?;
            }
            Command::StmtClose => {
                let id = reader.read_u32("statement id")?;
                let statement = self
                    .statements
                    .remove(id)
                    .ok_or(DecodeError::UnknownStatement(id))?;
                events.push(DecodeEvent::StatementClosed {
                    id,
                    sql: statement.sql,
                });
            }
            other => trace!("Not decoding {}", other),
        }

        Ok(())
    }

    fn decode_prepare_response(
        &mut self,
        payload: &[u8],
        events: &mut Vec<DecodeEvent>,
    ) -> Result<(), DecodeError> {
        let mut reader = PayloadReader::new(payload);
        let status = reader.read_u8("prepare status")?;
        let pending = self.pending_prepare.take();

        if status != 0 {
            debug!("Prepare rejected by server (status 0x{:02x}), dropping statement text", status);
            return Ok(());
        }

        let sql = pending.ok_or(DecodeError::MissingPendingPrepare)?;
        let id = reader.read_u32("statement id")?;
        reader.skip("column count", 2)?;
        let param_count = reader.read_u16("parameter count")?;

        self.statements.insert(PreparedStatement { id, sql, param_count });
        events.push(DecodeEvent::StatementPrepared { id, param_count });
        Ok(())
    }
}

/// Skip the fixed execute fields and the NULL bitmap; parameter values are not decoded.
fn skip_execute_params(reader: &mut PayloadReader<'_>, statement: &PreparedStatement) -> Result<(), DecodeError> {
    reader.skip("cursor flags", 1)?;
    reader.skip("iteration count", 4)?;

    if statement.param_count > 0 {
        reader.skip("null bitmap", statement.null_bitmap_len())?;
        let new_params_bound = reader.read_u8("new params bound flag")?;
        trace!(
            "Statement {} executed with {} params (new params bound: {})",
            statement.id,
            statement.param_count,
            new_params_bound == 1
        );
    }
    Ok(())
}
