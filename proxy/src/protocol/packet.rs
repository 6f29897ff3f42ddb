//! MySQL packet framing
//!
//! Every frame on the wire is a 4-byte header (24-bit little-endian payload
//! length followed by a one-byte sequence id) and the payload itself. All
//! accessors here are bounds-checked and report [`DecodeError`] instead of
//! reading past the supplied bytes.
use crate::error::DecodeError;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Buf;

/// MySQL packet header size: 3 bytes length + 1 byte sequence
pub const PACKET_HEADER_SIZE: usize = 4;

/// Packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (24-bit)
    pub payload_length: u32,

    /// Sequence id; zero marks the first frame of a new command
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Parse a header from the first four bytes of `data`
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(DecodeError::TruncatedHeader { available: data.len() });
        }

        Ok(Self {
            payload_length: LittleEndian::read_u24(&data[..3]),
            sequence_id: data[3],
        })
    }

    /// Whether this header starts a new client command
    pub fn starts_command(&self) -> bool {
        self.sequence_id == 0
    }
}

/// A complete frame borrowed from a relayed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Frame header
    pub header: PacketHeader,

    /// Exactly `header.payload_length` bytes
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse the leading frame of `data`.
    ///
    /// Fails when the header declares more payload than `data` holds. Bytes
    /// after the leading frame are ignored.
    pub fn parse(data: &'a [u8]) -> Result<Self, DecodeError> {
        let header = PacketHeader::parse(data)?;
        let declared = header.payload_length as usize;
        let available = data.len() - PACKET_HEADER_SIZE;

        if declared > available {
            return Err(DecodeError::TruncatedFrame { declared, available });
        }

        Ok(Self {
            header,
            payload: &data[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + declared],
        })
    }

    /// Total size of the frame on the wire
    pub fn len(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Bounds-checked little-endian reader over a frame payload
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    /// Create a reader positioned at the start of `payload`
    pub fn new(payload: &'a [u8]) -> Self {
        Self { buf: payload }
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Insufficient {
                field,
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Read a one-byte integer
    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        self.ensure(field, 1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a two-byte integer
    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        self.ensure(field, 2)?;
        Ok(self.buf.get_u16_le())
    }

    /// Read a four-byte integer
    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.ensure(field, 4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Skip `count` bytes
    pub fn skip(&mut self, field: &'static str, count: usize) -> Result<(), DecodeError> {
        self.ensure(field, count)?;
        self.buf.advance(count);
        Ok(())
    }

    /// Consume the rest of the payload as (lossy) UTF-8 text
    pub fn read_rest_string(&mut self) -> String {
        let text = String::from_utf8_lossy(self.buf).into_owned();
        self.buf.advance(self.buf.len());
        text
    }
}
