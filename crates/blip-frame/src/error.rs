/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4250 \"BP\")")]
    InvalidMagic,

    /// The type bits of the flags byte hold an unassigned value.
    #[error("invalid message type bits ({0:#04x})")]
    InvalidMessageType(u8),

    /// Message numbers are sender-assigned starting at 1; zero is reserved.
    #[error("message number must be positive")]
    ZeroMessageNumber,

    /// The frame header holds a malformed or truncated varint.
    #[error("malformed varint in frame header")]
    BadVarint,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

impl From<blip_io::TransportError> for FrameError {
    fn from(err: blip_io::TransportError) -> Self {
        use blip_io::TransportError;
        match err {
            TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
            TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
                FrameError::Io(source)
            }
            other => FrameError::Io(std::io::Error::other(other.to_string())),
        }
    }
}
