//! Framing: length-prefix (4 bytes LE) + bincode payload.
//!
//! Generic over serde types so the same framing carries transfer messages on the
//! data channel and signaling messages to the rendezvous service.

use serde::de::DeserializeOwned;
use serde::Serialize;

pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 1024 * 1024; // 1 MiB

/// Encode a value into a single frame: 4 bytes LE length + bincode payload.
/// Oversized values are rejected before any payload bytes are produced.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, FrameEncodeError> {
    let size = bincode::serialized_size(value)?;
    if size > u64::from(MAX_FRAME_LEN) {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + size as usize);
    out.extend_from_slice(&(size as u32).to_le_bytes());
    bincode::serialize_into(&mut out, value)?;
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Payload length announced by the prefix at the front of `bytes`.
fn announced_len(bytes: &[u8]) -> Result<usize, FrameDecodeError> {
    let prefix: [u8; LEN_SIZE] = bytes
        .get(..LEN_SIZE)
        .and_then(|p| p.try_into().ok())
        .ok_or(FrameDecodeError::NeedMore)?;
    let len = u32::from_le_bytes(prefix);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len as usize)
}

/// Decode one frame from the front of `bytes`. Returns the value and the number of
/// bytes consumed, or `NeedMore` if the buffer holds only part of a frame.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize), FrameDecodeError> {
    let end = LEN_SIZE + announced_len(bytes)?;
    let payload = bytes.get(LEN_SIZE..end).ok_or(FrameDecodeError::NeedMore)?;
    Ok((bincode::deserialize(payload)?, end))
}

/// Decode a channel message that must hold exactly one frame.
pub fn decode_exact<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, FrameDecodeError> {
    let (msg, consumed) = decode_frame(bytes)?;
    if consumed != bytes.len() {
        return Err(FrameDecodeError::TrailingBytes(bytes.len() - consumed));
    }
    Ok(msg)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
