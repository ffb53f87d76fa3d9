//! Varint primitives for the snapshot format
//!
//! Unsigned integers use 7 bits per byte with the high bit as continuation
//! flag; strings are a varint byte length followed by UTF-8 bytes.

use std::io::{self, Read, Write};

/// Encode a varint (variable-length integer) into the buffer.
pub fn encode_varint(buf: &mut Vec<u8>, mut n: u64) {
    while n >= 0x80 {
        buf.push((n as u8) | 0x80);
        n >>= 7;
    }
    buf.push(n as u8);
}

pub fn write_varint<W: Write>(writer: &mut W, n: u64) -> io::Result<()> {
    let mut buf = Vec::with_capacity(10);
    encode_varint(&mut buf, n);
    writer.write_all(&buf)
}

/// Read one varint. Overlong encodings are reported as `InvalidData`,
/// a stream ending mid-value as `UnexpectedEof`.
pub fn read_varint<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    let mut byte = [0u8; 1];

    loop {
        reader.read_exact(&mut byte)?;
        // The tenth byte may only carry the top bit of a u64.
        if shift == 63 && byte[0] & 0x7E != 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflow"));
        }
        result |= ((byte[0] & 0x7F) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflow"));
        }
    }
}

pub fn write_string<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    write_varint(writer, s.len() as u64)?;
    writer.write_all(s.as_bytes())
}

/// Read a length-prefixed string, refusing lengths above `max_len`.
pub fn read_string<R: Read>(reader: &mut R, max_len: usize) -> io::Result<String> {
    let len = read_varint(reader)?;
    if len > max_len as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("string length {} exceeds limit {}", len, max_len),
        ));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_varint_small() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 42);
        assert_eq!(buf, vec![42]);
        assert_eq!(read_varint(&mut Cursor::new(&buf)).unwrap(), 42);
    }

    #[test]
    fn test_varint_large() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(read_varint(&mut Cursor::new(&buf)).unwrap(), 300);
    }

    #[test]
    fn test_varint_max() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, u64::MAX);
        assert_eq!(buf.len(), 10);
        assert_eq!(read_varint(&mut Cursor::new(&buf)).unwrap(), u64::MAX);
    }

    #[test]
    fn test_read_varint_truncated() {
        let err = read_varint(&mut Cursor::new(&[0x80u8, 0x80])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_varint_rejects_lost_high_bits() {
        let mut bytes = vec![0xFFu8; 9];
        bytes.push(0x02);
        let err = read_varint(&mut Cursor::new(&bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_varint_overflow() {
        let err = read_varint(&mut Cursor::new(&[0xFFu8; 11])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_string_roundtrip_and_limit() {
        let mut buf = Vec::new();
        write_string(&mut buf, "http://schema.org/name").unwrap();
        let mut cursor = Cursor::new(&buf);
        assert_eq!(read_string(&mut cursor, 1024).unwrap(), "http://schema.org/name");

        let err = read_string(&mut Cursor::new(&buf), 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
