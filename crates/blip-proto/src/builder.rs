use blip_frame::{put_uvarint, tokenize, ByteWriter, FrameFlags, MessageType, MAX_VARINT_LEN64};
use bytes::Bytes;

use crate::incoming::MessageIn;

/// Bytes reserved up front for the properties-size varint. One byte covers
/// properties up to 127 bytes, the common case; longer blocks trigger a
/// re-emit in `finish_properties`.
const PROPERTIES_SIZE_RESERVED: usize = 1;

/// Staged serializer for one outgoing message: properties first, then body.
///
/// The payload it produces is `uvarint(properties_len) ‖ properties ‖ body`,
/// where properties are NUL-delimited `key NUL value NUL` pairs with
/// well-known strings abbreviated to a single token byte.
///
/// Property names and values must not contain NUL and, when non-empty, must
/// start at byte value 32 or above so they cannot be mistaken for a token.
/// Violations are programmer errors, checked in debug builds only.
pub struct MessageBuilder {
    /// Message type; `Request` unless this builds a response or error.
    pub message_type: MessageType,
    /// Ask the scheduler to prefer this message's frames.
    pub urgent: bool,
    /// Reserved; sending compressed messages is not implemented.
    pub compressed: bool,
    /// Tell the peer not to answer (requests only).
    pub no_reply: bool,
    out: ByteWriter,
    properties_size_pos: Option<usize>,
    extracted: bool,
}

impl MessageBuilder {
    /// A request builder: reply expected, not urgent, not compressed.
    pub fn new() -> Self {
        let mut out = ByteWriter::new();
        let pos = out.reserve_space(PROPERTIES_SIZE_RESERVED);
        Self {
            message_type: MessageType::Request,
            urgent: false,
            compressed: false,
            no_reply: false,
            out,
            properties_size_pos: Some(pos),
            extracted: false,
        }
    }

    /// A builder for the response to `request`, inheriting its urgency.
    ///
    /// The caller guarantees `request` is a request with reply expected.
    pub fn response_to(request: &MessageIn) -> Self {
        debug_assert!(request.is_request(), "can only respond to a request");
        debug_assert!(!request.no_reply(), "request does not expect a reply");
        let mut builder = Self::new();
        builder.message_type = MessageType::Response;
        builder.urgent = request.urgent();
        builder
    }

    /// Append one `name = value` property.
    pub fn add_property(&mut self, name: &str, value: &str) -> &mut Self {
        debug_assert!(
            self.properties_size_pos.is_some(),
            "properties already finalized"
        );
        self.append_segment(name.as_bytes());
        self.append_segment(value.as_bytes());
        self
    }

    /// Append one property with a decimal integer value.
    pub fn add_int_property(&mut self, name: &str, value: i64) -> &mut Self {
        self.add_property(name, &value.to_string())
    }

    /// Turn this message into an error reply carrying the given domain and
    /// code, plus an optional human-readable message.
    pub fn make_error(&mut self, domain: &str, code: i64, message: Option<&str>) -> &mut Self {
        debug_assert!(!domain.is_empty(), "error domain must not be empty");
        self.message_type = MessageType::Error;
        self.add_property("Error-Domain", domain);
        self.add_int_property("Error-Code", code);
        if let Some(message) = message {
            self.add_property("Error-Message", message);
        }
        self
    }

    /// Append body bytes. The first call finalizes the properties block; no
    /// properties can be added afterwards.
    pub fn write(&mut self, body: &[u8]) -> &mut Self {
        debug_assert!(!self.extracted, "builder already extracted");
        if self.properties_size_pos.is_some() {
            self.finish_properties();
        }
        self.out.write(body);
        self
    }

    /// Finalize and take the complete payload. The builder is spent until
    /// `reset` is called.
    pub fn extract_output(&mut self) -> Bytes {
        self.finish_properties();
        self.extracted = true;
        self.out.extract_output()
    }

    /// Return to a fresh state, keeping the type and flag fields.
    pub fn reset(&mut self) {
        self.out.reset();
        self.properties_size_pos = Some(self.out.reserve_space(PROPERTIES_SIZE_RESERVED));
        self.extracted = false;
    }

    /// The frame flags for this message: type + urgent + compressed +
    /// no-reply.
    pub fn flags(&self) -> FrameFlags {
        let mut flags = FrameFlags::for_type(self.message_type);
        if self.urgent {
            flags |= FrameFlags::URGENT;
        }
        if self.compressed {
            flags |= FrameFlags::COMPRESSED;
        }
        if self.no_reply {
            flags |= FrameFlags::NO_REPLY;
        }
        flags
    }

    fn append_segment(&mut self, segment: &[u8]) {
        debug_assert!(
            !segment.contains(&0),
            "property strings must not contain NUL"
        );
        debug_assert!(
            segment.is_empty() || segment[0] >= 32,
            "property strings must not start with a control byte"
        );
        match tokenize(segment) {
            Some(token) => self.out.push(token),
            None => self.out.write(segment),
        }
        self.out.push(0);
    }

    fn finish_properties(&mut self) {
        let Some(pos) = self.properties_size_pos.take() else {
            return;
        };
        let size = (self.out.len() - PROPERTIES_SIZE_RESERVED) as u64;
        let mut buf = [0u8; MAX_VARINT_LEN64];
        let len = put_uvarint(&mut buf, size);
        if len == PROPERTIES_SIZE_RESERVED {
            // Overwrite the placeholder with the real size byte.
            self.out.rewrite(pos, &buf[..len]);
        } else {
            // The size needs a wider varint than was reserved; re-emit with
            // the full-width prefix.
            let tail = self.out.extract_output();
            self.out.write(&buf[..len]);
            self.out.write(&tail[PROPERTIES_SIZE_RESERVED..]);
        }
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
