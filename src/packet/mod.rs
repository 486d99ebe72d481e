//! CubeSQL frame encoding/decoding
//!
//! A request is a 32-byte header, an optional array of big-endian field sizes
//! and the field data. When the session is encrypted the field data is sealed
//! as `IV || ciphertext`; the size array always travels in clear. A reply is a
//! 32-byte header followed by `packet_size` payload bytes, possibly
//! zlib-compressed and then sealed; the codec opens before it inflates.

mod chunk;
mod compress;
mod header;

pub use chunk::{split_chunks, Chunk, ChunkAssembler};
pub use compress::{compress, inflate};
pub use header::{ReplyHeader, RequestHeader};

use bytes::Bytes;

use crate::buffer::WriteBuffer;
use crate::constants::{protocol_version, Command, Encryption, BLOCK_LEN, HEADER_SIZE};
use crate::crypto::PayloadCipher;
use crate::error::{Error, Result};

/// A request ready to be encoded
#[derive(Debug, Clone)]
pub struct RequestFrame {
    /// The request header; `packet_size` is filled in by the codec
    pub header: RequestHeader,
    /// Field sizes sent ahead of the data
    pub sizes: Vec<u32>,
    /// Field data, `None` for header-only requests
    pub body: Option<Bytes>,
}

impl RequestFrame {
    /// Header-only request
    pub fn new(header: RequestHeader) -> Self {
        Self {
            header,
            sizes: Vec::new(),
            body: None,
        }
    }

    /// Attach fields, each announced in the size array
    pub fn with_fields(mut self, fields: &[&[u8]]) -> Self {
        let mut data = WriteBuffer::with_capacity(fields.iter().map(|f| f.len()).sum());
        self.sizes.clear();
        for field in fields {
            self.sizes.push(field.len() as u32);
            data.write_bytes(field);
        }
        self.header.num_fields = fields.len() as u32;
        self.body = Some(data.freeze());
        self
    }

    /// Attach a single NUL-terminated SQL statement
    pub fn with_statement(self, sql: &str) -> Self {
        let mut data = WriteBuffer::with_capacity(sql.len() + 1);
        data.write_cstring(sql);
        let data = data.freeze();
        self.with_fields(&[&data])
    }

    /// Attach a chunk body: one field, no size array
    pub fn with_chunk(mut self, data: Bytes) -> Self {
        self.sizes.clear();
        self.header.num_fields = 1;
        self.body = Some(data);
        self
    }

    /// Attach a body that is already sealed, with the given size array
    pub fn with_raw_body(mut self, sizes: Vec<u32>, data: Bytes) -> Self {
        self.header.num_fields = sizes.len() as u32;
        self.sizes = sizes;
        self.body = Some(data);
        self
    }
}

/// A decoded reply: header plus opened payload
#[derive(Debug, Clone)]
pub struct Frame {
    /// The reply header
    pub header: ReplyHeader,
    /// Decrypted and inflated payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from a header and payload
    pub fn new(header: ReplyHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Whether this frame closes a chunk sequence
    pub fn is_final_chunk(&self) -> bool {
        self.header.is_end_chunk() || !self.header.is_partial()
    }

    /// Get the payload size
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// Frame encoder/decoder carrying per-session wire state
#[derive(Debug, Clone)]
pub struct FrameCodec {
    encryption: Encryption,
    cipher: Option<PayloadCipher>,
    timeout_secs: u32,
    protocol_version: u8,
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec with no payload encryption
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            encryption: Encryption::None,
            cipher: None,
            timeout_secs: 0,
            protocol_version: protocol_version::V2011,
            max_frame_size,
        }
    }

    /// Set the timeout advertised in every request header
    pub fn with_timeout_secs(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the protocol version advertised in every request header
    pub fn with_protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = version;
        self
    }

    /// Switch payload encryption on or off
    pub fn set_encryption(&mut self, encryption: Encryption, cipher: Option<PayloadCipher>) {
        self.encryption = encryption.payload_mode();
        self.cipher = cipher;
    }

    /// Current payload encryption
    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    /// Session cipher, if payloads are sealed
    pub fn cipher(&self) -> Option<&PayloadCipher> {
        self.cipher.as_ref()
    }

    /// Frame ceiling in bytes
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Build a request header carrying the session's wire state
    pub fn header(&self, command: Command, selector: u8) -> RequestHeader {
        let mut header = RequestHeader::new(command, selector);
        header.encrypted_packet = self.encryption as u8;
        header.protocol_version = self.protocol_version;
        header.timeout = self.timeout_secs;
        header
    }

    /// Start a request frame
    pub fn request(&self, command: Command, selector: u8) -> RequestFrame {
        RequestFrame::new(self.header(command, selector))
    }

    /// Encode a request: header, size array, then the (sealed) body
    ///
    /// Empty bodies are never sealed, so they add no IV.
    pub fn encode(&self, frame: &RequestFrame) -> Result<Bytes> {
        let body = match (&frame.body, &self.cipher) {
            (Some(body), Some(cipher)) if !body.is_empty() => Some(Bytes::from(cipher.seal(body)?)),
            (body, _) => body.clone(),
        };

        let body_len = body.as_ref().map_or(0, |b| b.len());
        let mut header = frame.header;
        header.packet_size = (frame.sizes.len() * 4 + body_len) as u32;

        let mut buf = WriteBuffer::with_capacity(HEADER_SIZE + header.packet_size as usize);
        header.write(&mut buf);
        for size in &frame.sizes {
            buf.write_u32_be(*size);
        }
        if let Some(body) = body {
            buf.write_bytes(&body);
        }
        Ok(buf.freeze())
    }

    /// Validate a reply header before its payload is read
    ///
    /// Returns the number of payload bytes to read.
    pub fn check_reply(&self, header: &ReplyHeader) -> Result<usize> {
        let size = header.packet_size as usize;
        if size > self.max_frame_size {
            return Err(Error::MalformedFrame(format!(
                "frame of {} bytes exceeds the {} byte limit",
                size, self.max_frame_size
            )));
        }
        if header.is_compressed() && header.expanded_size as usize > self.max_frame_size {
            return Err(Error::MalformedFrame(format!(
                "inflated frame of {} bytes exceeds the {} byte limit",
                header.expanded_size, self.max_frame_size
            )));
        }
        Ok(size)
    }

    /// Open a raw reply payload: decrypt, then inflate
    pub fn open_payload(&self, header: &ReplyHeader, raw: Bytes) -> Result<Bytes> {
        let mut payload = raw;
        if header.encrypted_packet != Encryption::None as u8 && !payload.is_empty() {
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                Error::Protocol("encrypted reply on a session without a key".to_string())
            })?;
            payload = Bytes::from(cipher.open(&payload)?);
        }
        if header.is_compressed() {
            payload = Bytes::from(inflate(&payload, header.expanded_size as usize)?);
        }
        Ok(payload)
    }

    /// Decode a complete reply held in memory
    pub fn decode(&self, data: Bytes) -> Result<Frame> {
        let header = ReplyHeader::parse(&data)?;
        let size = self.check_reply(&header)?;
        let available = data.len() - HEADER_SIZE;
        if size != available {
            return Err(Error::MalformedFrame(format!(
                "declared payload of {} bytes, {} available",
                size, available
            )));
        }
        let payload = self.open_payload(&header, data.slice(HEADER_SIZE..))?;
        Ok(Frame::new(header, payload))
    }

    /// Extra bytes a sealed body adds on the wire
    pub fn seal_overhead(&self) -> usize {
        if self.cipher.is_some() {
            BLOCK_LEN
        } else {
            0
        }
    }
}
