//! Sequential accessors over a packet payload.
//!
//! Reads are bounds-checked: running off the end of the payload is a
//! protocol violation, surfaced as [`ProtocolError::MalformedPacket`] so
//! the session can close the connection.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

pub struct PayloadReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        PayloadReader { payload, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.payload.len());
        let Some(end) = end else {
            return Err(ProtocolError::MalformedPacket(format!(
                "payload read of {n} bytes at offset {} overruns length {}",
                self.pos,
                self.payload.len()
            )));
        };
        let slice = &self.payload[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// A byte string with a big-endian u16 length prefix.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u16()?;
        self.take(usize::from(len))
    }

    /// A length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtocolError::MalformedPacket("string is not valid UTF-8".to_string()))
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.payload.len()
    }

    /// The unread tail of the payload, without advancing the cursor.
    pub fn remaining(&self) -> &'a [u8] {
        &self.payload[self.pos..]
    }
}

#[derive(Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    pub fn new() -> Self {
        PayloadWriter::default()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    /// Raw bytes, no length prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// A byte string with a big-endian u16 length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= usize::from(u16::MAX));
        self.buf.put_u16(bytes.len() as u16);
        self.buf.put_slice(bytes);
    }

    pub fn put_string(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    pub fn into_payload(self) -> Bytes {
        self.buf.freeze()
    }
}
