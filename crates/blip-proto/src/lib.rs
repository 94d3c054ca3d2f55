//! BLIP protocol core.
//!
//! BLIP multiplexes request/response message streams over one reliable,
//! full-duplex byte transport. Messages are sent in frames, interleaved by
//! urgency, with advisory per-message acknowledgements for back-pressure.
//!
//! The moving parts:
//! - [`MessageBuilder`] serializes properties + body into one payload.
//! - [`MessageOut`] is an outgoing message with send/ack byte accounting.
//! - [`MessageIn`] reassembles an incoming message and parses its properties.
//! - [`ResponseFuture`] hands a completed response to the waiting caller.
//! - [`Connection`] owns the send scheduler, the receive loop, and the
//!   delegate.

pub mod builder;
pub mod connection;
pub mod delegate;
pub mod error;
pub mod future;
pub mod incoming;
pub mod outgoing;

pub use builder::MessageBuilder;
pub use connection::{
    Connection, ConnectionConfig, ConnectionHandle, DEFAULT_FRAME_SIZE, DEFAULT_SEND_WINDOW,
};
pub use delegate::{ConnectionDelegate, NullDelegate};
pub use error::{ConnectionError, ProtocolError, Result};
pub use future::{ResponseError, ResponseFuture};
pub use incoming::{FrameOutcome, MessageIn, DEFAULT_PROPERTIES_CAP, INCOMING_ACK_THRESHOLD};
pub use outgoing::MessageOut;
