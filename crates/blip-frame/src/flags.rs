//! The per-frame flags byte: message type in the low three bits, flag bits
//! above. Every value here is wire-significant.

use bitflags::bitflags;

use crate::error::FrameError;

/// Sender-assigned message identifier. Strictly positive, unique within one
/// direction of a connection; a response carries the number of its request.
pub type MessageNo = u64;

/// Mask of the type bits within the flags byte.
pub const TYPE_MASK: u8 = 0x07;

/// Message type carried in the low three bits of the flags byte.
///
/// Values 3, 6 and 7 are unassigned; receiving one is a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Initiates an exchange.
    Request = 0,
    /// Normal reply to a request whose `NO_REPLY` flag is unset.
    Response = 1,
    /// Failure reply; correlates like a `Response`.
    Error = 2,
    /// Flow control for an incoming request; body is a single varint of
    /// cumulative bytes received.
    AckRequest = 4,
    /// Flow control for an incoming response.
    AckResponse = 5,
}

impl MessageType {
    /// Decode the type bits of a flags byte.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & TYPE_MASK {
            0 => Some(Self::Request),
            1 => Some(Self::Response),
            2 => Some(Self::Error),
            4 => Some(Self::AckRequest),
            5 => Some(Self::AckResponse),
            _ => None,
        }
    }

    /// True for types that travel in the response direction.
    pub fn is_response(self) -> bool {
        matches!(self, Self::Response | Self::Error)
    }

    /// True for the flow-control types.
    pub fn is_ack(self) -> bool {
        matches!(self, Self::AckRequest | Self::AckResponse)
    }

    /// Short name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Request => "REQ",
            Self::Response => "RES",
            Self::Error => "ERR",
            Self::AckRequest => "ACKREQ",
            Self::AckResponse => "ACKRES",
        }
    }
}

bitflags! {
    /// Flag bits of the frame flags byte. The low three bits hold the
    /// [`MessageType`] and are retained by this newtype.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u8 {
        /// Body is compressed. Reserved: refused on receive, never sent.
        const COMPRESSED = 0x08;
        /// The scheduler must prefer this message's frames.
        const URGENT = 0x10;
        /// The sender expects no response (requests only).
        const NO_REPLY = 0x20;
        /// More frames of this message follow.
        const MORE_COMING = 0x40;
        // Type bits, kept so `bits()` round-trips the wire byte.
        const _ = TYPE_MASK;
    }
}

impl FrameFlags {
    /// Flags holding only the given message type.
    pub fn for_type(message_type: MessageType) -> Self {
        Self::from_bits_retain(message_type as u8)
    }

    /// Validate and adopt a raw wire byte.
    pub fn from_byte(byte: u8) -> Result<Self, FrameError> {
        if MessageType::from_bits(byte).is_none() {
            return Err(FrameError::InvalidMessageType(byte & TYPE_MASK));
        }
        Ok(Self::from_bits_truncate(byte))
    }

    /// The message type in the low bits.
    ///
    /// Flags built by this crate always hold a valid type; raw bytes are
    /// validated by [`FrameFlags::from_byte`].
    pub fn message_type(self) -> MessageType {
        match MessageType::from_bits(self.bits()) {
            Some(message_type) => message_type,
            None => unreachable!("flags constructed without a valid message type"),
        }
    }

    /// Replace the type bits, keeping the flag bits.
    pub fn with_type(self, message_type: MessageType) -> Self {
        Self::from_bits_retain((self.bits() & !TYPE_MASK) | message_type as u8)
    }

    pub fn is_urgent(self) -> bool {
        self.contains(Self::URGENT)
    }

    pub fn no_reply(self) -> bool {
        self.contains(Self::NO_REPLY)
    }

    pub fn more_coming(self) -> bool {
        self.contains(Self::MORE_COMING)
    }

    pub fn compressed(self) -> bool {
        self.contains(Self::COMPRESSED)
    }
}

impl std::fmt::Display for FrameFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}", self.bits())
    }
}
