//! Wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers.

use crate::error::{ProtocolError, Result};

/// Positional reader over a received frame payload.
///
/// Every accessor advances an internal cursor and fails with
/// [`ProtocolError::MalformedFrame`] when the requested span runs past the
/// end of the payload.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Wrap a frame payload.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn overrun(&self, what: &str, want: usize) -> crate::error::Error {
        ProtocolError::MalformedFrame(format!(
            "{what}: needed {want} bytes, {} remain",
            self.remaining()
        ))
        .into()
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| self.overrun("read_u8", 1))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read a 2-byte big-endian signed integer.
    pub fn read_i16(&mut self) -> Result<i16> {
        let bytes: [u8; 2] = self.read_bytes(2)?.try_into().unwrap_or([0; 2]);
        Ok(i16::from_be_bytes(bytes))
    }

    /// Read a 4-byte big-endian signed integer.
    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes: [u8; 4] = self.read_bytes(4)?.try_into().unwrap_or([0; 4]);
        Ok(i32::from_be_bytes(bytes))
    }

    /// Read a 4-byte big-endian unsigned integer.
    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.read_bytes(4)?.try_into().unwrap_or([0; 4]);
        Ok(u32::from_be_bytes(bytes))
    }

    /// Read exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.overrun("read_bytes", len));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a NUL-terminated string (PostgreSQL String type) as UTF-8.
    pub fn read_cstr(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.pos..];
        let nul = memchr::memchr(0, rest).ok_or_else(|| {
            crate::error::Error::from(ProtocolError::MalformedFrame(
                "read_cstr: no NUL terminator".into(),
            ))
        })?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|e| {
            ProtocolError::MalformedFrame(format!("read_cstr: invalid UTF-8: {e}"))
        })?;
        self.pos += nul + 1;
        Ok(s)
    }

    /// Consume and return all remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}

/// Message builder that handles the length field of a frontend frame.
///
/// Frame format:
/// - Type byte (1 byte), absent for startup-stage messages
/// - Length (4 bytes), includes itself but not the type byte
/// - Payload (Length - 4 bytes)
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start building a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Start building an untagged message (StartupMessage, SSLRequest).
    pub fn new_untagged(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a 2-byte big-endian signed integer.
    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a 4-byte big-endian signed integer.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Write a NUL-terminated string.
    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Fill in the length field covering itself and the payload.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_primitives() {
        let data = [0x00, 0x07, 0xff, 0xff, 0xff, 0xff, b'h', b'i', 0, 0x2a];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_i16().unwrap(), 7);
        assert_eq!(reader.read_i32().unwrap(), -1);
        assert_eq!(reader.read_cstr().unwrap(), "hi");
        assert_eq!(reader.read_u8().unwrap(), 0x2a);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn reader_overrun_is_malformed_frame() {
        let mut reader = PacketReader::new(&[0x01]);
        let err = reader.read_i32().unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Protocol(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn reader_missing_nul_is_malformed_frame() {
        let mut reader = PacketReader::new(b"abc");
        assert!(reader.read_cstr().is_err());
    }

    #[test]
    fn builder_length_covers_itself_and_payload() {
        let mut buf = Vec::new();
        let mut msg = MessageBuilder::new(&mut buf, b'Q');
        msg.write_cstr("SELECT 1");
        msg.finish();

        assert_eq!(buf[0], b'Q');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
    }

    #[test]
    fn untagged_builder() {
        let mut buf = Vec::new();
        let mut msg = MessageBuilder::new_untagged(&mut buf);
        msg.write_i32(80877103);
        msg.finish();

        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &8_i32.to_be_bytes());
    }
}
