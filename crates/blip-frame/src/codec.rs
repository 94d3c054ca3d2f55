use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::flags::{FrameFlags, MessageNo};
use crate::varint::{put_uvarint, read_uvarint, uvarint_len, MAX_VARINT_LEN64};

/// Envelope header: magic (2) + body length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "BP" (0x42 0x50).
pub const MAGIC: [u8; 2] = [0x42, 0x50];

/// Worst-case bytes of flags + message number inside the envelope.
pub const MAX_FRAME_OVERHEAD: usize = 1 + MAX_VARINT_LEN64;

/// Default maximum frame payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One frame of a message: a contiguous slice of its payload stream plus the
/// flags byte and the message number it belongs to.
#[derive(Debug, Clone)]
pub struct Frame {
    pub flags: FrameFlags,
    pub number: MessageNo,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(flags: FrameFlags, number: MessageNo, payload: impl Into<Bytes>) -> Self {
        Self {
            flags,
            number,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (envelope + flags + number + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + 1 + uvarint_len(self.number) + self.payload.len()
    }
}

/// Largest possible frame preamble: envelope header + flags byte + message
/// number varint.
pub const PREAMBLE_MAX: usize = HEADER_SIZE + MAX_FRAME_OVERHEAD;

/// Assemble the preamble of a frame — envelope header, flags byte, and
/// message number — into `out`, returning the number of bytes used.
/// `payload_len` is the length of the payload that will follow it.
pub fn frame_preamble(
    flags: FrameFlags,
    number: MessageNo,
    payload_len: usize,
    out: &mut [u8; PREAMBLE_MAX],
) -> Result<usize> {
    if number == 0 {
        return Err(FrameError::ZeroMessageNumber);
    }
    if payload_len > u32::MAX as usize - MAX_FRAME_OVERHEAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: u32::MAX as usize - MAX_FRAME_OVERHEAD,
        });
    }

    let mut number_buf = [0u8; MAX_VARINT_LEN64];
    let number_len = put_uvarint(&mut number_buf, number);
    let body_len = 1 + number_len + payload_len;

    out[..2].copy_from_slice(&MAGIC);
    out[2..6].copy_from_slice(&(body_len as u32).to_le_bytes());
    out[6] = flags.bits();
    out[7..7 + number_len].copy_from_slice(&number_buf[..number_len]);
    Ok(HEADER_SIZE + 1 + number_len)
}

/// Validate an envelope header and return the length of the body behind it.
pub fn parse_envelope(header: &[u8; HEADER_SIZE], max_payload: usize) -> Result<usize> {
    if header[..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }
    let body_len = u32::from_le_bytes(header[2..6].try_into().unwrap()) as usize;
    if body_len > max_payload.saturating_add(MAX_FRAME_OVERHEAD) {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_payload,
        });
    }
    Ok(body_len)
}

/// Decode a frame body — everything after the envelope header: flags byte,
/// message number, payload.
pub fn parse_frame_body(body: Bytes, max_payload: usize) -> Result<Frame> {
    let Some((&flags_byte, after_flags)) = body.split_first() else {
        return Err(FrameError::BadVarint);
    };
    let flags = FrameFlags::from_byte(flags_byte)?;

    let mut cursor = after_flags;
    let number = read_uvarint(&mut cursor).ok_or(FrameError::BadVarint)?;
    if number == 0 {
        return Err(FrameError::ZeroMessageNumber);
    }
    if cursor.len() > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: cursor.len(),
            max: max_payload,
        });
    }

    let payload = body.slice_ref(cursor);
    Ok(Frame {
        flags,
        number,
        payload,
    })
}

/// Encode a frame into the wire format.
///
/// ```text
/// ┌────────────┬───────────┬───────────┬──────────────────┬──────────┐
/// │ Magic (2B) │ Length    │ Flags     │ Message number   │ Payload  │
/// │ 0x42 0x50  │ (4B LE)   │ (1B)      │ (uvarint)        │          │
/// └────────────┴───────────┴───────────┴──────────────────┴──────────┘
/// ```
///
/// `Length` counts everything after itself. The magic + length envelope is
/// the stream transport's frame delimitation; the BLIP contract proper
/// begins at the flags byte.
pub fn encode_frame(
    flags: FrameFlags,
    number: MessageNo,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let mut preamble = [0u8; PREAMBLE_MAX];
    let preamble_len = frame_preamble(flags, number, payload.len(), &mut preamble)?;
    dst.reserve(preamble_len + payload.len());
    dst.put_slice(&preamble[..preamble_len]);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let header: [u8; HEADER_SIZE] = src[..HEADER_SIZE].try_into().unwrap();
    let body_len = parse_envelope(&header, max_payload)?;

    if src.len() < HEADER_SIZE + body_len {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();
    parse_frame_body(body, max_payload).map(Some)
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum frame payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
