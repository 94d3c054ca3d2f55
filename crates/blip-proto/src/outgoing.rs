use blip_frame::{FrameFlags, MessageNo, MessageType};
use bytes::Bytes;

use crate::builder::MessageBuilder;
use crate::future::ResponseFuture;
use crate::incoming::MessageIn;

/// An outgoing message: payload + flags + number, plus the byte accounting
/// the sender's scheduler uses.
///
/// Not internally synchronized; the owning connection serializes access.
#[derive(Debug)]
pub struct MessageOut {
    flags: FrameFlags,
    number: MessageNo,
    payload: Bytes,
    bytes_sent: u32,
    unacked_bytes: u32,
    pending_response: Option<MessageIn>,
}

impl MessageOut {
    /// Wrap a finished payload. `flags` must not carry `MORE_COMING` (that is
    /// per-frame state) or `COMPRESSED` (not implemented).
    pub fn new(flags: FrameFlags, payload: Bytes, number: MessageNo) -> Self {
        debug_assert!(number > 0, "message numbers start at 1");
        debug_assert!(
            (payload.len() as u64) < u64::from(u32::MAX),
            "payload must stay below 4 GiB"
        );
        debug_assert!(!flags.more_coming(), "MORE_COMING is set per frame");
        debug_assert!(!flags.compressed(), "compression is not implemented");

        // The placeholder's flags are tentative; the first response frame
        // overwrites them (the type may turn out to be Error, and URGENT may
        // be set).
        let pending_response = (flags.message_type() == MessageType::Request
            && !flags.no_reply())
        .then(|| MessageIn::new(FrameFlags::for_type(MessageType::Response), number));

        Self {
            flags,
            number,
            payload,
            bytes_sent: 0,
            unacked_bytes: 0,
            pending_response,
        }
    }

    /// Build an outgoing message from a builder, consuming its payload.
    pub fn from_builder(builder: &mut MessageBuilder, number: MessageNo) -> Self {
        Self::new(builder.flags(), builder.extract_output(), number)
    }

    pub fn number(&self) -> MessageNo {
        self.number
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn message_type(&self) -> MessageType {
        self.flags.message_type()
    }

    pub fn is_urgent(&self) -> bool {
        self.flags.is_urgent()
    }

    pub fn no_reply(&self) -> bool {
        self.flags.no_reply()
    }

    /// Bytes handed to the transport so far.
    pub fn bytes_sent(&self) -> u32 {
        self.bytes_sent
    }

    /// Bytes sent but not yet acknowledged by the peer. The scheduler skips
    /// a message whose unacked count exceeds its window.
    pub fn unacked_bytes(&self) -> u32 {
        self.unacked_bytes
    }

    /// True once the whole payload has been handed out.
    pub fn is_drained(&self) -> bool {
        self.bytes_sent as usize >= self.payload.len()
    }

    /// The next up-to-`max_size` bytes of the payload, with the flags to send
    /// them under. `MORE_COMING` is set iff unsent bytes remain afterwards.
    /// Returns an empty slice once the message is drained.
    pub fn next_frame(&mut self, max_size: usize) -> (Bytes, FrameFlags) {
        let start = self.bytes_sent as usize;
        let size = max_size.min(self.payload.len() - start);
        let frame = self.payload.slice(start..start + size);

        self.bytes_sent += size as u32;
        self.unacked_bytes += size as u32;

        let mut flags = self.flags;
        if (self.bytes_sent as usize) < self.payload.len() {
            flags |= FrameFlags::MORE_COMING;
        }
        (frame, flags)
    }

    /// The peer acknowledged receipt of `byte_count` cumulative bytes.
    /// Stale and out-of-range acks are ignored; lower bound only.
    pub fn received_ack(&mut self, byte_count: u32) {
        if byte_count <= self.bytes_sent {
            self.unacked_bytes = self.unacked_bytes.min(self.bytes_sent - byte_count);
        }
    }

    /// A future for the correlated response. `Some` exactly when this is a
    /// request with reply expected; at most one future per message.
    pub fn future_response(&mut self) -> Option<ResponseFuture> {
        self.pending_response
            .as_mut()
            .map(MessageIn::create_response_future)
    }

    /// Move the pending-response placeholder out; the connection files it in
    /// its incoming table when the request is queued.
    pub(crate) fn take_pending_response(&mut self) -> Option<MessageIn> {
        self.pending_response.take()
    }
}
