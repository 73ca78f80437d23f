//! The variable-length remaining-length field of the fixed header.
//!
//! A 1–4 byte base-128 integer, least-significant group first; the high bit
//! of each byte marks continuation. Four bytes encode values up to
//! 2^28 − 1, and a fifth continuation byte is a protocol error.

use bytes::{BufMut, BytesMut};

use crate::error::{ProtocolError, Result};

/// Largest value representable in four remaining-length bytes.
pub const MAX_REMAINING_LENGTH: usize = 0x0FFF_FFFF;

/// Appends the remaining-length encoding of `len` to `buf`.
///
/// `len` must not exceed [`MAX_REMAINING_LENGTH`]; packet payloads are
/// capped well below it by the reader.
pub fn encode_remaining_length(mut len: usize, buf: &mut BytesMut) {
    debug_assert!(len <= MAX_REMAINING_LENGTH);
    loop {
        let mut byte = (len & 0x7F) as u8;
        len >>= 7;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Decodes a remaining-length field from the front of `buf`.
///
/// Returns the decoded value and the number of bytes consumed. Fails with
/// [`ProtocolError::MalformedRemainingLength`] if a fifth byte would be
/// needed, or if `buf` ends mid-field.
pub fn decode_remaining_length(buf: &[u8]) -> Result<(usize, usize)> {
    let mut value = 0usize;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        value |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
        if shift > 21 {
            return Err(ProtocolError::MalformedRemainingLength);
        }
    }
    Err(ProtocolError::MalformedRemainingLength)
}
