//! Multipart wire encoding
//!
//! One tunnel message is a sequence of opaque parts. On the wire (before
//! transport encryption) it is laid out as:
//!
//! ```text
//! u32 part-count | (u32 length, bytes) per part
//! ```
//!
//! all integers big-endian, with the total size bounded by
//! [`crate::MAX_MESSAGE_SIZE`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::CodecError;
use crate::MAX_MESSAGE_SIZE;

/// Encode a multipart message into a single buffer.
pub fn encode_parts(parts: &[Bytes]) -> Result<Bytes, CodecError> {
    let total: usize = 4 + parts.iter().map(|p| 4 + p.len()).sum::<usize>();
    if total > MAX_MESSAGE_SIZE as usize {
        return Err(CodecError::MessageTooLarge(total));
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32(parts.len() as u32);
    for part in parts {
        buf.put_u32(part.len() as u32);
        buf.put(part.clone());
    }
    Ok(buf.freeze())
}

/// Decode a buffer produced by [`encode_parts`] back into its parts.
pub fn decode_parts(mut buf: Bytes) -> Result<Vec<Bytes>, CodecError> {
    if buf.len() > MAX_MESSAGE_SIZE as usize {
        return Err(CodecError::MessageTooLarge(buf.len()));
    }
    if buf.remaining() < 4 {
        return Err(CodecError::IncompleteMessage);
    }

    let count = buf.get_u32() as usize;
    // Each part needs at least its length prefix.
    if count > buf.remaining() / 4 {
        return Err(CodecError::MalformedFrame(format!(
            "part count {count} exceeds message size"
        )));
    }

    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.remaining() < 4 {
            return Err(CodecError::IncompleteMessage);
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(CodecError::IncompleteMessage);
        }
        parts.push(buf.split_to(len));
    }
    Ok(parts)
}
