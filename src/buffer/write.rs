//! Write buffer for encoding CubeSQL frames

use bytes::{BufMut, Bytes, BytesMut};

/// A growable buffer for building request frames
#[derive(Debug, Default)]
pub struct WriteBuffer {
    data: BytesMut,
}

impl WriteBuffer {
    /// Create a new WriteBuffer with default capacity
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new WriteBuffer with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the current length of data in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the buffer contents as a byte slice
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the buffer into immutable Bytes
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Write a single byte
    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }

    /// Write a 16-bit unsigned integer in big-endian format
    pub fn write_u16_be(&mut self, value: u16) {
        self.data.put_u16(value);
    }

    /// Write a 32-bit unsigned integer in big-endian format
    pub fn write_u32_be(&mut self, value: u32) {
        self.data.put_u32(value);
    }

    /// Write a 32-bit signed integer in big-endian format
    pub fn write_i32_be(&mut self, value: i32) {
        self.data.put_i32(value);
    }

    /// Write a string followed by a NUL terminator
    pub fn write_cstring(&mut self, value: &str) {
        self.data.put_slice(value.as_bytes());
        self.data.put_u8(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_integers_big_endian() {
        let mut buf = WriteBuffer::new();
        buf.write_u32_be(0x5351_4C53);
        buf.write_u16_be(777);
        buf.write_i32_be(-1);
        assert_eq!(
            buf.as_slice(),
            &[0x53, 0x51, 0x4C, 0x53, 0x03, 0x09, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn test_write_cstring() {
        let mut buf = WriteBuffer::new();
        buf.write_cstring("PING;");
        assert_eq!(buf.as_slice(), b"PING;\0");
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn test_freeze() {
        let mut buf = WriteBuffer::with_capacity(4);
        buf.write_u8(1);
        buf.write_bytes(&[2, 3]);
        assert_eq!(&buf.freeze()[..], &[1, 2, 3]);
    }
}
