//! Byte-channel transport for BLIP connections.
//!
//! BLIP itself only needs a full-duplex reliable byte stream; this crate
//! provides the Unix-domain-socket flavor: bind/accept/connect plus a
//! connected [`BlipStream`] with timeouts, cloning, and shutdown.
//!
//! Unix only.

pub mod error;
pub mod socket;
pub mod stream;

pub use error::{Result, TransportError};
pub use socket::{connect, UnixServerSocket, DEFAULT_SOCKET_MODE};
pub use stream::BlipStream;
