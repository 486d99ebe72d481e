//! Chunked transfers
//!
//! Large payloads cross the wire as a sequence of chunks; only the last one
//! is marked final. Splitting slices the payload without copying.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

/// One piece of a chunked payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk data
    pub data: Bytes,
    /// Last chunk of the sequence
    pub is_final: bool,
}

/// Split `payload` into chunks of at most `max_chunk` bytes
///
/// An empty payload yields a single empty final chunk.
pub fn split_chunks(payload: &Bytes, max_chunk: usize) -> Vec<Chunk> {
    let max_chunk = max_chunk.max(1);
    if payload.is_empty() {
        return vec![Chunk {
            data: Bytes::new(),
            is_final: true,
        }];
    }

    let count = payload.len().div_ceil(max_chunk);
    (0..count)
        .map(|i| {
            let start = i * max_chunk;
            let end = (start + max_chunk).min(payload.len());
            Chunk {
                data: payload.slice(start..end),
                is_final: i + 1 == count,
            }
        })
        .collect()
}

/// Reassembles a chunk sequence into the original payload
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    buf: BytesMut,
    chunks: usize,
    done: bool,
}

impl ChunkAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks received so far
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Whether the final chunk has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Add a chunk; returns the payload once the final chunk arrives
    pub fn push(&mut self, chunk: Chunk) -> Result<Option<Bytes>> {
        if self.done {
            return Err(Error::Protocol("chunk received after the final chunk".to_string()));
        }
        self.buf.extend_from_slice(&chunk.data);
        self.chunks += 1;
        if chunk.is_final {
            self.done = true;
            return Ok(Some(std::mem::take(&mut self.buf).freeze()));
        }
        Ok(None)
    }
}
