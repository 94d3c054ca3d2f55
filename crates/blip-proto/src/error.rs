use blip_frame::{FrameError, MessageNo};

/// Protocol violations detected while reassembling an incoming message.
///
/// These fail the connection; they are never reported back to the peer as an
/// `Error` message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The first frame is too small to hold the properties-size varint, or
    /// the varint is malformed.
    #[error("frame too small to hold the properties size")]
    BadPropertiesSize,

    /// The declared properties size exceeds the configured cap.
    #[error("properties too large ({size} bytes, max {max})")]
    PropertiesTooLarge { size: u32, max: u32 },

    /// The properties block does not end in a NUL byte.
    #[error("message properties not NUL-terminated")]
    PropertiesNotTerminated,

    /// The message ended before the declared properties size was reached.
    #[error("message ends before end of properties")]
    PropertiesTruncated,

    /// The peer sent a compressed frame; compression is not implemented.
    #[error("compressed frames are not supported")]
    CompressionUnsupported,

    /// A response arrived for a message number we never asked about.
    #[error("response to unknown message #{0}")]
    UnexpectedResponse(MessageNo),
}

/// Errors surfaced by a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Frame-level error on the transport.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The peer violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] blip_io::TransportError),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
