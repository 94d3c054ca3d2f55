use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use blip_frame::{
    expand, put_uvarint, read_uvarint32, ByteWriter, FrameFlags, MessageNo, MessageType,
    MAX_VARINT_LEN64,
};
use bytes::Bytes;
use tracing::debug;

use crate::builder::MessageBuilder;
use crate::connection::ConnectionHandle;
use crate::error::{ProtocolError, Result};
use crate::future::{response_pair, ResponseFuture, ResponseSlot};
use crate::outgoing::MessageOut;

/// How many payload bytes to receive before acknowledging them.
pub const INCOMING_ACK_THRESHOLD: u32 = 50_000;

/// Default cap on a message's declared properties size.
pub const DEFAULT_PROPERTIES_CAP: u32 = 16 * 1024;

/// What one received frame did to a message under reassembly.
#[derive(Debug)]
pub struct FrameOutcome {
    /// The message is complete; no more frames will be accepted.
    pub complete: bool,
    /// A flow-control ack to send back, if the threshold was crossed.
    pub ack: Option<MessageOut>,
}

/// An incoming message under reassembly: accumulates frames, parses the
/// properties block, and asks for acks at byte thresholds.
///
/// Constructed with tentative flags; the first frame overwrites them (a
/// pending response may turn out to be an `Error`, or gain `URGENT`).
pub struct MessageIn {
    flags: FrameFlags,
    number: MessageNo,
    properties_cap: u32,
    started: bool,
    accumulator: ByteWriter,
    properties_size: u32,
    properties: Option<Bytes>,
    body: Option<Bytes>,
    unacked_bytes: u32,
    response_slot: Option<ResponseSlot>,
    responded: AtomicBool,
}

impl MessageIn {
    pub fn new(tentative_flags: FrameFlags, number: MessageNo) -> Self {
        debug_assert!(number > 0, "message numbers start at 1");
        Self {
            flags: tentative_flags,
            number,
            properties_cap: DEFAULT_PROPERTIES_CAP,
            started: false,
            accumulator: ByteWriter::new(),
            properties_size: 0,
            properties: None,
            body: None,
            unacked_bytes: 0,
            response_slot: None,
            responded: AtomicBool::new(false),
        }
    }

    /// Override the cap on the declared properties size.
    pub fn with_properties_cap(mut self, cap: u32) -> Self {
        self.properties_cap = cap;
        self
    }

    /// Feed one frame of this message, in wire order.
    ///
    /// Any error fails the message and should close the connection; errors
    /// are never reported back to the peer.
    pub fn received_frame(
        &mut self,
        frame: &[u8],
        frame_flags: FrameFlags,
    ) -> std::result::Result<FrameOutcome, ProtocolError> {
        // Cumulative count for the ack body, taken before this frame is
        // consumed (the accumulator holds everything since the last extract).
        let bytes_received = self.accumulator.len() as u64 + frame.len() as u64;

        let mut rest = frame;
        if !self.started {
            self.started = true;
            self.flags = frame_flags;
            debug!(
                "Receiving {} #{}, flags={:02x}",
                frame_flags.message_type().name(),
                self.number,
                frame_flags.bits()
            );
            if self.flags.compressed() {
                return Err(ProtocolError::CompressionUnsupported);
            }
            let Some(size) = read_uvarint32(&mut rest) else {
                return Err(ProtocolError::BadPropertiesSize);
            };
            if size > self.properties_cap {
                return Err(ProtocolError::PropertiesTooLarge {
                    size,
                    max: self.properties_cap,
                });
            }
            self.properties_size = size;
        }

        if self.properties.is_none()
            && self.accumulator.len() + rest.len() >= self.properties_size as usize
        {
            // The complete properties block is now on hand.
            let missing = self.properties_size as usize - self.accumulator.len();
            self.accumulator.write(&rest[..missing]);
            rest = &rest[missing..];
            let properties = self.accumulator.extract_output();
            if properties.last().is_some_and(|&last| last != 0) {
                return Err(ProtocolError::PropertiesNotTerminated);
            }
            self.properties = Some(properties);
        }

        self.unacked_bytes += rest.len() as u32;
        let mut ack = None;
        if self.unacked_bytes >= INCOMING_ACK_THRESHOLD {
            ack = Some(self.make_ack(bytes_received));
            self.unacked_bytes = 0;
        }

        self.accumulator.write(rest);

        if frame_flags.more_coming() {
            return Ok(FrameOutcome {
                complete: false,
                ack,
            });
        }

        if self.properties.is_none() {
            return Err(ProtocolError::PropertiesTruncated);
        }
        self.body = Some(self.accumulator.extract_output());
        debug!(
            "Finished receiving {} #{}, flags={:02x}",
            self.flags.message_type().name(),
            self.number,
            self.flags.bits()
        );
        Ok(FrameOutcome {
            complete: true,
            ack,
        })
    }

    fn make_ack(&self, bytes_received: u64) -> MessageOut {
        let ack_type = if self.flags.message_type().is_response() {
            MessageType::AckResponse
        } else {
            MessageType::AckRequest
        };
        let mut buf = [0u8; MAX_VARINT_LEN64];
        let len = put_uvarint(&mut buf, bytes_received);
        MessageOut::new(
            FrameFlags::for_type(ack_type) | FrameFlags::URGENT | FrameFlags::NO_REPLY,
            Bytes::copy_from_slice(&buf[..len]),
            self.number,
        )
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

    pub fn is_request(&self) -> bool {
        self.message_type() == MessageType::Request
    }

    pub fn is_response(&self) -> bool {
        self.message_type().is_response()
    }

    pub fn is_error(&self) -> bool {
        self.message_type() == MessageType::Error
    }

    pub fn urgent(&self) -> bool {
        self.flags.is_urgent()
    }

    pub fn no_reply(&self) -> bool {
        self.flags.no_reply()
    }

    /// True once the final frame has been received.
    pub fn is_complete(&self) -> bool {
        self.body.is_some()
    }

    /// The raw NUL-delimited properties block (empty until parsed).
    pub fn properties(&self) -> &[u8] {
        self.properties.as_deref().unwrap_or_default()
    }

    /// The message body (empty until complete).
    pub fn body(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    /// Look up a property value. Single-byte tokens are expanded on both
    /// keys and values, so `property("Profile")` matches a tokenized key.
    pub fn property(&self, name: &str) -> Option<&[u8]> {
        let block = self.properties.as_deref()?;
        let name = name.as_bytes();
        let mut segments = block.split(|&byte| byte == 0);
        while let (Some(key), Some(value)) = (segments.next(), segments.next()) {
            if key.is_empty() {
                // The terminator of the previous pair; a legal key is never
                // empty.
                break;
            }
            if expand(key) == name {
                return Some(expand(value));
            }
        }
        None
    }

    /// All decoded `(key, value)` pairs in wire order, tokens expanded.
    pub fn property_pairs(&self) -> Vec<(&[u8], &[u8])> {
        let Some(block) = self.properties.as_deref() else {
            return Vec::new();
        };
        let mut pairs = Vec::new();
        let mut segments = block.split(|&byte| byte == 0);
        while let (Some(key), Some(value)) = (segments.next(), segments.next()) {
            if key.is_empty() {
                break;
            }
            pairs.push((expand(key), expand(value)));
        }
        pairs
    }

    /// A property value as UTF-8, if it is valid.
    pub fn property_string(&self, name: &str) -> Option<&str> {
        std::str::from_utf8(self.property(name)?).ok()
    }

    /// A property parsed as a base-10 integer; `default` on absence, empty
    /// value, or trailing junk.
    pub fn int_property(&self, name: &str, default: i64) -> i64 {
        self.property_string(name)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    /// The `Profile` property, naming the request's operation.
    pub fn profile(&self) -> Option<&str> {
        self.property_string("Profile")
    }

    /// The `Content-Type` property.
    pub fn content_type(&self) -> Option<&str> {
        self.property_string("Content-Type")
    }

    /// The error domain; `None` unless this is an `Error` message.
    pub fn error_domain(&self) -> Option<&str> {
        if self.is_error() {
            self.property_string("Error-Domain")
        } else {
            None
        }
    }

    /// The error code; 0 unless this is an `Error` message.
    pub fn error_code(&self) -> i64 {
        if self.is_error() {
            self.int_property("Error-Code", 0)
        } else {
            0
        }
    }

    /// The optional error message; `None` unless this is an `Error` message.
    pub fn error_message(&self) -> Option<&str> {
        if self.is_error() {
            self.property_string("Error-Message")
        } else {
            None
        }
    }

    /// Send a reply to this request.
    ///
    /// The builder's type is coerced from `Request` to `Response`; `Error`
    /// passes through. Must be called at most once, on a request with reply
    /// expected (programmer error otherwise; a violation is a no-op in
    /// release builds).
    pub fn respond(&self, conn: &ConnectionHandle, builder: &mut MessageBuilder) -> Result<()> {
        debug_assert!(self.is_request(), "only requests take replies");
        debug_assert!(!self.no_reply(), "request does not expect a reply");
        if !self.is_request() || self.no_reply() {
            return Ok(());
        }
        if self.responded.swap(true, Ordering::SeqCst) {
            debug_assert!(false, "request already answered");
            return Ok(());
        }
        if builder.message_type == MessageType::Request {
            builder.message_type = MessageType::Response;
        }
        conn.send(MessageOut::from_builder(builder, self.number))
    }

    /// Reply with an application error.
    pub fn respond_with_error(
        &self,
        conn: &ConnectionHandle,
        domain: &str,
        code: i64,
        message: Option<&str>,
    ) -> Result<()> {
        let mut builder = MessageBuilder::response_to(self);
        builder.make_error(domain, code, message);
        self.respond(conn, &mut builder)
    }

    /// Create the future that resolves when this pending response completes.
    pub(crate) fn create_response_future(&mut self) -> ResponseFuture {
        debug_assert!(self.response_slot.is_none(), "future already created");
        let (future, slot) = response_pair();
        self.response_slot = Some(slot);
        future
    }

    /// Detach the fulfilment side before handing the completed message to
    /// its consumers.
    pub(crate) fn take_response_slot(&mut self) -> Option<ResponseSlot> {
        self.response_slot.take()
    }

    /// Fulfil the future (if any) and return the message ready for delegate
    /// dispatch.
    pub(crate) fn into_completed(mut self) -> Arc<MessageIn> {
        let slot = self.take_response_slot();
        let message = Arc::new(self);
        if let Some(slot) = slot {
            slot.fulfil(Arc::clone(&message));
        }
        message
    }
}

impl std::fmt::Debug for MessageIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageIn")
            .field("type", &self.message_type().name())
            .field("number", &self.number)
            .field("flags", &format_args!("{:02x}", self.flags.bits()))
            .field("complete", &self.is_complete())
            .finish()
    }
}
