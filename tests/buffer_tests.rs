//! Integration tests for buffer module

use cubesql::buffer::{ReadBuffer, WriteBuffer};
use cubesql::Error;

#[test]
fn test_buffer_roundtrip_integers() {
    for value in [0u32, 1, 255, 256, 65_535, 1_000_000, u32::MAX] {
        let mut write_buf = WriteBuffer::new();
        write_buf.write_u32_be(value);

        let mut read_buf = ReadBuffer::from_slice(write_buf.as_slice());
        assert_eq!(read_buf.read_u32_be().unwrap(), value, "u32 roundtrip failed for {}", value);
    }
}

#[test]
fn test_buffer_null_cell_marker() {
    let mut write_buf = WriteBuffer::new();
    write_buf.write_i32_be(-1);
    assert_eq!(write_buf.as_slice(), &[0xff, 0xff, 0xff, 0xff]);

    let mut read_buf = ReadBuffer::from_slice(write_buf.as_slice());
    assert_eq!(read_buf.read_i32_be().unwrap(), -1);
}

#[test]
fn test_buffer_cstrings() {
    let mut write_buf = WriteBuffer::new();
    write_buf.write_cstring("id");
    write_buf.write_cstring("");
    write_buf.write_cstring("name");

    let mut read_buf = ReadBuffer::from_slice(write_buf.as_slice());
    assert_eq!(read_buf.read_cstring().unwrap(), "id");
    assert_eq!(read_buf.read_cstring().unwrap(), "");
    assert_eq!(read_buf.read_cstring().unwrap(), "name");
    assert_eq!(read_buf.remaining(), 0);
}

#[test]
fn test_buffer_unterminated_cstring() {
    let mut read_buf = ReadBuffer::from_slice(b"abc");
    assert!(matches!(
        read_buf.read_cstring(),
        Err(Error::MalformedFrame(_))
    ));
}

#[test]
fn test_buffer_multiple_values() {
    let mut write_buf = WriteBuffer::new();
    write_buf.write_u8(0x42);
    write_buf.write_u16_be(0x1234);
    write_buf.write_u32_be(0xDEAD_BEEF);
    write_buf.write_bytes(b"tail");

    let mut read_buf = ReadBuffer::from_slice(write_buf.as_slice());
    assert_eq!(read_buf.read_u8().unwrap(), 0x42);
    assert_eq!(read_buf.read_u16_be().unwrap(), 0x1234);
    assert_eq!(read_buf.read_u32_be().unwrap(), 0xDEAD_BEEF);
    assert_eq!(&read_buf.read_bytes(4).unwrap()[..], b"tail");
}

#[test]
fn test_buffer_position_tracking() {
    let mut read_buf = ReadBuffer::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(read_buf.position(), 0);
    assert_eq!(read_buf.remaining(), 8);

    read_buf.read_u16_be().unwrap();
    assert_eq!(read_buf.position(), 2);

    read_buf.skip(3).unwrap();
    assert_eq!(read_buf.position(), 5);
    assert_eq!(read_buf.remaining_bytes(), &[6, 7, 8]);
}

#[test]
fn test_buffer_underflow() {
    let mut read_buf = ReadBuffer::from_slice(&[1, 2]);
    assert!(matches!(
        read_buf.read_u32_be(),
        Err(Error::BufferUnderflow { needed: 4, available: 2 })
    ));
    // A failed read consumes nothing
    assert_eq!(read_buf.read_u16_be().unwrap(), 0x0102);
}
