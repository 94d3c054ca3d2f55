//! BLIP messaging over a single reliable byte transport.
//!
//! BLIP is a binary, bidirectional, multiplexed request/response protocol:
//! messages travel as interleaved frames, correlated by sender-assigned
//! numbers, with urgency-aware scheduling and advisory acknowledgements for
//! per-message back-pressure.
//!
//! # Crate Structure
//!
//! - [`io`] — Unix-domain-socket transport (streams, bind/accept/connect)
//! - [`frame`] — Wire layer: varints, frame flags, tokens, frame codec
//! - [`proto`] — Protocol core: builder, reassembly, futures, connection

/// Re-export transport types.
pub mod io {
    pub use blip_io::*;
}

/// Re-export wire-layer types.
pub mod frame {
    pub use blip_frame::*;
}

/// Re-export protocol-core types.
pub mod proto {
    pub use blip_proto::*;
}
