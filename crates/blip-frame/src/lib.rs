//! BLIP wire layer: frames, flags, varints, and the well-known-string table.
//!
//! A BLIP message's payload is `uvarint(properties_len) ‖ properties ‖ body`;
//! frames carry contiguous slices of that stream. On a byte-oriented
//! transport each frame travels in a small envelope:
//! - A 2-byte magic number ("BP") for stream synchronization
//! - A 4-byte little-endian length
//! - The flags byte (message type + flag bits)
//! - The message number as an unsigned varint
//!
//! No partial reads, no buffer management in user code.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod flags;
pub mod reader;
pub mod token;
pub mod varint;
pub mod writer;

pub use buffer::ByteWriter;
pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    MAX_FRAME_OVERHEAD,
};
pub use error::{FrameError, Result};
pub use flags::{FrameFlags, MessageNo, MessageType, TYPE_MASK};
pub use reader::FrameReader;
pub use token::{expand, token_string, tokenize, MAX_TOKEN, WELL_KNOWN};
pub use varint::{put_uvarint, read_uvarint, read_uvarint32, uvarint_len, MAX_VARINT_LEN64};
pub use writer::FrameWriter;
