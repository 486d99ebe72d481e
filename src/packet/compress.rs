//! zlib compression for chunk payloads

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

/// Compress `data`, returning `None` when compression does not shrink it
pub fn compress(data: &[u8]) -> Result<Option<Vec<u8>>> {
    if data.is_empty() {
        return Ok(None);
    }
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    if compressed.len() < data.len() {
        Ok(Some(compressed))
    } else {
        Ok(None)
    }
}

/// Inflate a zlib payload that must expand to exactly `expanded_size` bytes
///
/// A corrupt stream or a size other than the announced one is a
/// [`Error::Protocol`] error.
pub fn inflate(data: &[u8], expanded_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expanded_size);
    ZlibDecoder::new(data)
        .take(expanded_size as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::Protocol(format!("zlib inflate failed: {}", e)))?;
    if out.len() != expanded_size {
        return Err(Error::Protocol(format!(
            "inflated {} bytes, header announced {}",
            out.len(),
            expanded_size
        )));
    }
    Ok(out)
}
