//! Framing: fixed 81-byte header + sender + content, big-endian integers.
//!
//! Layout (offsets in bytes):
//! `0` version (1) | `1` message id, zero-padded to 36 | `37` sender length (u32) |
//! `41` timestamp (i64, ms) | `49` checksum, 32 hex chars | `81` sender | then content.
//!
//! The id field carries the full 36-char hyphenated UUID. An earlier revision
//! truncated it to 16 bytes, which made the embedded checksum (computed over the
//! untruncated id) unverifiable on the receiving side; the field was widened so
//! decode-side validation can succeed at all.

use crate::message::{compute_checksum, Message};

/// Current wire format revision. Frames with any other version byte are rejected.
pub const PROTOCOL_VERSION: u8 = 1;

const ID_SIZE: usize = 36;
const CHECKSUM_SIZE: usize = 32;

/// Fixed header: version + id + sender length + timestamp + checksum.
pub const HEADER_SIZE: usize = 1 + ID_SIZE + 4 + 8 + CHECKSUM_SIZE;
/// Whole-frame cap; matches the transport's maximum datagram size.
pub const MAX_FRAME_LEN: usize = 8192;
/// Upper bound on the encoded sender name, in UTF-8 bytes.
pub const MAX_SENDER_LEN: usize = 256;

/// Encode a message into a single datagram payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let sender = msg.sender.as_bytes();
    let content = msg.content.as_bytes();
    if sender.len() > MAX_SENDER_LEN {
        return Err(FrameEncodeError::SenderTooLong(sender.len()));
    }
    let total = HEADER_SIZE + sender.len() + content.len();
    if total > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge(total));
    }

    let mut out = Vec::with_capacity(total);
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&fixed_field::<ID_SIZE>(msg.id.as_bytes()));
    out.extend_from_slice(&(sender.len() as u32).to_be_bytes());
    out.extend_from_slice(&msg.timestamp.to_be_bytes());
    out.extend_from_slice(&fixed_field::<CHECKSUM_SIZE>(msg.checksum.as_bytes()));
    out.extend_from_slice(sender);
    out.extend_from_slice(content);
    Ok(out)
}

/// Error encoding a message into a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("sender too long: {0} bytes (max {MAX_SENDER_LEN})")]
    SenderTooLong(usize),
    #[error("frame too large: {0} bytes (max {MAX_FRAME_LEN})")]
    TooLarge(usize),
}

/// Decode one datagram payload back into a message. Never panics; every
/// malformed input maps to an error the transport drops silently.
pub fn decode_frame(bytes: &[u8]) -> Result<Message, FrameDecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameDecodeError::Truncated);
    }
    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(FrameDecodeError::BadVersion(version));
    }
    let id = padded_str(&bytes[1..1 + ID_SIZE])?;
    let sender_len = u32::from_be_bytes([bytes[37], bytes[38], bytes[39], bytes[40]]);
    if sender_len as usize > MAX_SENDER_LEN {
        return Err(FrameDecodeError::SenderLenOutOfRange(sender_len));
    }
    let timestamp = i64::from_be_bytes([
        bytes[41], bytes[42], bytes[43], bytes[44], bytes[45], bytes[46], bytes[47], bytes[48],
    ]);
    let checksum = padded_str(&bytes[49..49 + CHECKSUM_SIZE])?;

    let payload = &bytes[HEADER_SIZE..];
    let sender_len = sender_len as usize;
    if payload.len() < sender_len {
        return Err(FrameDecodeError::Truncated);
    }
    let sender =
        std::str::from_utf8(&payload[..sender_len]).map_err(|_| FrameDecodeError::BadUtf8)?;
    let content =
        std::str::from_utf8(&payload[sender_len..]).map_err(|_| FrameDecodeError::BadUtf8)?;

    if compute_checksum(id, sender, content, timestamp) != checksum {
        return Err(FrameDecodeError::ChecksumMismatch);
    }
    Ok(Message {
        id: id.to_string(),
        sender: sender.to_string(),
        content: content.to_string(),
        timestamp,
        checksum: checksum.to_string(),
    })
}

/// Error decoding a frame. All variants mean "drop this frame"; none is fatal.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame truncated")]
    Truncated,
    #[error("unsupported protocol version {0}")]
    BadVersion(u8),
    #[error("sender length {0} out of range")]
    SenderLenOutOfRange(u32),
    #[error("invalid utf-8 in frame")]
    BadUtf8,
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// Copy `src` into an N-byte field, truncating or zero-padding on the right.
fn fixed_field<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let n = src.len().min(N);
    out[..n].copy_from_slice(&src[..n]);
    out
}

/// Read a fixed field back as a str, stripping the zero padding.
fn padded_str(bytes: &[u8]) -> Result<&str, FrameDecodeError> {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    std::str::from_utf8(&bytes[..end]).map_err(|_| FrameDecodeError::BadUtf8)
}
