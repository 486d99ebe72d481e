//! CubeSQL frame headers
//!
//! Every request and every reply starts with a 32-byte big-endian header.
//!
//! ```text
//! request:
//! +-----------+-----------+---+---+---+---+---+---+---+---+-----------+-----------+-----------+-------+-------+
//! | signature | pkt size  |cmd|sel|fl1|fl2|fl3|enc|ver|cli| nfields   | expanded  | timeout   | rsv1  | rsv2  |
//! +-----------+-----------+---+---+---+---+---+---+---+---+-----------+-----------+-----------+-------+-------+
//!
//! reply:
//! +-----------+-----------+-------+---+---+-----------+-----------+-----------+-----------+-------+-------+
//! | signature | pkt size  | error |fl1|enc| expanded  | rows      | cols      | nfields   | rsv1  | rsv2  |
//! +-----------+-----------+-------+---+---+-----------+-----------+-----------+-----------+-------+-------+
//! ```
//!
//! The packet size counts only the bytes after the header.

use bytes::Bytes;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::constants::{
    client_flags, protocol_version, server_flags, Command, END_CHUNK, HEADER_SIZE,
    PROTOCOL_SIGNATURE,
};
use crate::error::{Error, Result};

fn check_signature(signature: u32) -> Result<()> {
    if signature != PROTOCOL_SIGNATURE {
        return Err(Error::MalformedFrame(format!(
            "wrong signature {:#010x}",
            signature
        )));
    }
    Ok(())
}

fn check_length(data: &[u8]) -> Result<()> {
    if data.len() < HEADER_SIZE {
        return Err(Error::MalformedFrame(format!(
            "header too short: expected {} bytes, got {}",
            HEADER_SIZE,
            data.len()
        )));
    }
    Ok(())
}

/// Request header (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Bytes following the header
    pub packet_size: u32,
    /// Command code
    pub command: Command,
    /// Command selector
    pub selector: u8,
    /// Client flags, see [`client_flags`]
    pub flag1: u8,
    /// Unused by current commands
    pub flag2: u8,
    /// Bind type for bind requests
    pub flag3: u8,
    /// Encryption mode the payload is sealed with
    pub encrypted_packet: u8,
    /// Protocol version
    pub protocol_version: u8,
    /// Client type
    pub client_type: u8,
    /// Number of fields in the size array
    pub num_fields: u32,
    /// Uncompressed size (or zero-blob length)
    pub expanded_size: u32,
    /// Server-side timeout in seconds
    pub timeout: u32,
    /// Bind ordinal for bind requests
    pub reserved1: u16,
    /// Reserved
    pub reserved2: u16,
}

impl RequestHeader {
    /// Create a header with the default flags and current protocol version
    pub fn new(command: Command, selector: u8) -> Self {
        Self {
            packet_size: 0,
            command,
            selector,
            flag1: client_flags::SUPPORT_COMPRESSION,
            flag2: 0,
            flag3: 0,
            encrypted_packet: 0,
            protocol_version: protocol_version::V2011,
            client_type: 0,
            num_fields: 0,
            expanded_size: 0,
            timeout: 0,
            reserved1: 0,
            reserved2: 0,
        }
    }

    /// Check a client flag bit
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flag1 & flag != 0
    }

    /// Parse a request header from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        check_length(data)?;
        let mut buf = ReadBuffer::from_slice(&data[..HEADER_SIZE]);
        Self::read(&mut buf)
    }

    /// Read a request header from a buffer
    pub fn read(buf: &mut ReadBuffer) -> Result<Self> {
        check_signature(buf.read_u32_be()?)?;
        Ok(Self {
            packet_size: buf.read_u32_be()?,
            command: Command::try_from(buf.read_u8()?)?,
            selector: buf.read_u8()?,
            flag1: buf.read_u8()?,
            flag2: buf.read_u8()?,
            flag3: buf.read_u8()?,
            encrypted_packet: buf.read_u8()?,
            protocol_version: buf.read_u8()?,
            client_type: buf.read_u8()?,
            num_fields: buf.read_u32_be()?,
            expanded_size: buf.read_u32_be()?,
            timeout: buf.read_u32_be()?,
            reserved1: buf.read_u16_be()?,
            reserved2: buf.read_u16_be()?,
        })
    }

    /// Write the header to a buffer
    pub fn write(&self, buf: &mut WriteBuffer) {
        buf.write_u32_be(PROTOCOL_SIGNATURE);
        buf.write_u32_be(self.packet_size);
        buf.write_u8(self.command as u8);
        buf.write_u8(self.selector);
        buf.write_u8(self.flag1);
        buf.write_u8(self.flag2);
        buf.write_u8(self.flag3);
        buf.write_u8(self.encrypted_packet);
        buf.write_u8(self.protocol_version);
        buf.write_u8(self.client_type);
        buf.write_u32_be(self.num_fields);
        buf.write_u32_be(self.expanded_size);
        buf.write_u32_be(self.timeout);
        buf.write_u16_be(self.reserved1);
        buf.write_u16_be(self.reserved2);
    }

    /// Encode the header to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = WriteBuffer::with_capacity(HEADER_SIZE);
        self.write(&mut buf);
        buf.freeze()
    }
}

/// Reply header (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplyHeader {
    /// Bytes following the header
    pub packet_size: u32,
    /// Zero on success, [`END_CHUNK`] at the end of a chunked transfer,
    /// otherwise a server error code with the message as payload
    pub error_code: u16,
    /// Server flags, see [`server_flags`]
    pub flag1: u8,
    /// Encryption mode the payload is sealed with
    pub encrypted_packet: u8,
    /// Inflated size of a compressed payload
    pub expanded_size: u32,
    /// Rows carried by a cursor payload
    pub rows: u32,
    /// Columns carried by a cursor payload, rowid column included
    pub cols: u32,
    /// Number of fields
    pub num_fields: u32,
    /// Reserved
    pub reserved1: u16,
    /// Reserved
    pub reserved2: u16,
}

impl ReplyHeader {
    /// Create a success header for a payload of the given size
    pub fn new(packet_size: u32) -> Self {
        Self {
            packet_size,
            ..Self::default()
        }
    }

    /// Create an error header
    pub fn failure(code: u16, message_len: u32) -> Self {
        Self {
            packet_size: message_len,
            error_code: code,
            ..Self::default()
        }
    }

    /// Create an end-of-chunk header
    pub fn end_chunk() -> Self {
        Self {
            error_code: END_CHUNK,
            ..Self::default()
        }
    }

    /// Check a server flag bit
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flag1 & flag != 0
    }

    /// The reply closes a chunked transfer
    pub fn is_end_chunk(&self) -> bool {
        self.error_code == END_CHUNK
    }

    /// Server error code, if this reply reports one
    pub fn error(&self) -> Option<i32> {
        match self.error_code {
            0 | END_CHUNK => None,
            code => Some(code as i32),
        }
    }

    /// More chunks follow this one
    pub fn is_partial(&self) -> bool {
        self.has_flag(server_flags::PARTIAL_PACKET)
    }

    /// Payload is zlib-compressed
    pub fn is_compressed(&self) -> bool {
        self.has_flag(server_flags::COMPRESSED_PACKET)
    }

    /// First cursor column carries the row id
    pub fn has_rowid(&self) -> bool {
        self.has_flag(server_flags::HAS_ROWID_COLUMN)
    }

    /// Cursor header carries table names after the column names
    pub fn has_table_names(&self) -> bool {
        self.has_flag(server_flags::HAS_TABLE_NAME)
    }

    /// Cursor lives on the server and is stepped row by row
    pub fn is_server_side(&self) -> bool {
        self.has_flag(server_flags::SERVER_SIDE)
    }

    /// Parse a reply header from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        check_length(data)?;
        let mut buf = ReadBuffer::from_slice(&data[..HEADER_SIZE]);
        Self::read(&mut buf)
    }

    /// Read a reply header from a buffer
    pub fn read(buf: &mut ReadBuffer) -> Result<Self> {
        check_signature(buf.read_u32_be()?)?;
        Ok(Self {
            packet_size: buf.read_u32_be()?,
            error_code: buf.read_u16_be()?,
            flag1: buf.read_u8()?,
            encrypted_packet: buf.read_u8()?,
            expanded_size: buf.read_u32_be()?,
            rows: buf.read_u32_be()?,
            cols: buf.read_u32_be()?,
            num_fields: buf.read_u32_be()?,
            reserved1: buf.read_u16_be()?,
            reserved2: buf.read_u16_be()?,
        })
    }

    /// Write the header to a buffer
    pub fn write(&self, buf: &mut WriteBuffer) {
        buf.write_u32_be(PROTOCOL_SIGNATURE);
        buf.write_u32_be(self.packet_size);
        buf.write_u16_be(self.error_code);
        buf.write_u8(self.flag1);
        buf.write_u8(self.encrypted_packet);
        buf.write_u32_be(self.expanded_size);
        buf.write_u32_be(self.rows);
        buf.write_u32_be(self.cols);
        buf.write_u32_be(self.num_fields);
        buf.write_u16_be(self.reserved1);
        buf.write_u16_be(self.reserved2);
    }

    /// Encode the header to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = WriteBuffer::with_capacity(HEADER_SIZE);
        self.write(&mut buf);
        buf.freeze()
    }
}
