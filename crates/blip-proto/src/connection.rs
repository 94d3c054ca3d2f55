use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use blip_frame::{
    read_uvarint32, Frame, FrameConfig, FrameError, FrameReader, FrameWriter, MessageNo,
    MessageType,
};
use blip_io::BlipStream;
use tracing::{debug, warn};

use crate::builder::MessageBuilder;
use crate::delegate::ConnectionDelegate;
use crate::error::{ConnectionError, ProtocolError, Result};
use crate::future::ResponseFuture;
use crate::incoming::MessageIn;
use crate::outgoing::MessageOut;

/// Default maximum bytes of one frame's payload.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Default per-message cap on sent-but-unacknowledged bytes.
pub const DEFAULT_SEND_WINDOW: u32 = 128 * 1024;

/// Tuning knobs for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum payload bytes per outgoing frame.
    pub max_frame_size: usize,
    /// A message with more unacked bytes than this is not scheduled.
    pub send_window: u32,
    /// Cap on an incoming message's declared properties size.
    pub max_properties_size: u32,
    /// Cap on a received frame's payload.
    pub max_payload_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_FRAME_SIZE,
            send_window: DEFAULT_SEND_WINDOW,
            max_properties_size: crate::incoming::DEFAULT_PROPERTIES_CAP,
            max_payload_size: blip_frame::DEFAULT_MAX_PAYLOAD,
        }
    }
}

struct Outbox {
    urgent: VecDeque<MessageOut>,
    normal: VecDeque<MessageOut>,
    /// A frame of this message is being written right now.
    in_flight: bool,
    closed: bool,
}

impl Outbox {
    fn new() -> Self {
        Self {
            urgent: VecDeque::new(),
            normal: VecDeque::new(),
            in_flight: false,
            closed: false,
        }
    }

    /// Next message allowed to send a frame: urgent first, then normal, each
    /// queue front-to-back, skipping messages over the ack window.
    fn pick(&mut self, window: u32) -> Option<MessageOut> {
        for queue in [&mut self.urgent, &mut self.normal] {
            if let Some(index) = queue.iter().position(|m| m.unacked_bytes() <= window) {
                return queue.remove(index);
            }
        }
        None
    }

    fn push(&mut self, message: MessageOut) {
        if message.is_urgent() {
            self.urgent.push_back(message);
        } else {
            self.normal.push_back(message);
        }
    }

    fn apply_ack(&mut self, ack_type: MessageType, number: MessageNo, byte_count: u32) -> bool {
        let wants_request = ack_type == MessageType::AckRequest;
        for queue in [&mut self.urgent, &mut self.normal] {
            for message in queue.iter_mut() {
                let is_request = message.message_type() == MessageType::Request;
                if message.number() == number && is_request == wants_request {
                    message.received_ack(byte_count);
                    return true;
                }
            }
        }
        false
    }

    fn is_idle(&self) -> bool {
        self.urgent.is_empty() && self.normal.is_empty() && !self.in_flight
    }
}

struct Shared {
    outbox: Mutex<Outbox>,
    work: Condvar,
    pending_responses: Mutex<HashMap<MessageNo, MessageIn>>,
    next_number: AtomicU64,
    closed: AtomicBool,
    shutdown_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    config: ConnectionConfig,
}

impl Shared {
    fn lock_outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tear the connection down: drop queued messages, fail pending futures,
    /// and shut the transport so both threads unblock. Idempotent.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut outbox = self.lock_outbox();
            outbox.closed = true;
            outbox.urgent.clear();
            outbox.normal.clear();
            self.work.notify_all();
        }
        // Dropping the placeholders drops their response slots, which
        // resolves every outstanding future with ConnectionClosed.
        self.pending_responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(hook) = self
            .shutdown_hook
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            hook();
        }
    }
}

/// A cloneable handle for sending on a connection. This is what delegates
/// receive to answer requests.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Enqueue an outgoing message. Urgent messages go to the preferred
    /// queue; a request's pending-response placeholder is filed for
    /// correlation before anything hits the wire.
    pub fn send(&self, mut message: MessageOut) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        let number = message.number();
        if let Some(pending) = message.take_pending_response() {
            let pending = pending.with_properties_cap(self.shared.config.max_properties_size);
            self.shared
                .pending_responses
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(number, pending);
        }
        {
            let mut outbox = self.shared.lock_outbox();
            if outbox.closed {
                drop(outbox);
                // The close path may not have seen the placeholder yet.
                self.shared
                    .pending_responses
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&number);
                return Err(ConnectionError::Closed);
            }
            outbox.push(message);
            self.shared.work.notify_all();
        }
        Ok(())
    }

    /// Assign the next message number to `builder`'s payload and enqueue it.
    /// Returns a future for the response unless the request is `no_reply`.
    pub fn send_request(&self, builder: &mut MessageBuilder) -> Result<Option<ResponseFuture>> {
        debug_assert!(
            builder.message_type == MessageType::Request,
            "send_request takes requests; responses go through MessageIn::respond"
        );
        let number = self.shared.next_number.fetch_add(1, Ordering::Relaxed);
        let mut message = MessageOut::from_builder(builder, number);
        let future = message.future_response();
        self.send(message)?;
        Ok(future)
    }

    /// Block until every queued frame has been handed to the transport.
    pub fn flush(&self) {
        let mut outbox = self.shared.lock_outbox();
        while !outbox.is_idle() && !outbox.closed {
            outbox = self
                .shared
                .work
                .wait(outbox)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Close the connection: queued messages are dropped and outstanding
    /// futures resolve with a connection-closed error.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// One BLIP connection over a full-duplex byte channel: a writer thread
/// draining the outgoing queues frame by frame, and a reader thread
/// reassembling incoming frames and dispatching completed messages.
pub struct Connection {
    handle: ConnectionHandle,
    writer_thread: Option<JoinHandle<()>>,
    reader_thread: Option<JoinHandle<()>>,
}

impl Connection {
    /// Open a connection over a `BlipStream` with the default config.
    pub fn over_stream(stream: BlipStream, delegate: Box<dyn ConnectionDelegate>) -> Result<Self> {
        Self::over_stream_with_config(stream, delegate, ConnectionConfig::default())
    }

    /// Open a connection over a `BlipStream` with an explicit config.
    pub fn over_stream_with_config(
        stream: BlipStream,
        delegate: Box<dyn ConnectionDelegate>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let reader_stream = stream.try_clone()?;
        let shutdown_stream = stream.try_clone()?;
        let frame_config = FrameConfig {
            max_payload_size: config.max_payload_size,
            ..FrameConfig::default()
        };
        Ok(Self::from_parts(
            FrameReader::with_config(reader_stream, frame_config.clone()),
            FrameWriter::with_config(stream, frame_config),
            move || {
                let _ = shutdown_stream.shutdown();
            },
            delegate,
            config,
        ))
    }

    /// Assemble a connection from an already-framed reader/writer pair.
    ///
    /// `shutdown` must unblock a read parked on the reader's stream; it runs
    /// once, when the connection closes.
    pub fn from_parts<R, W>(
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
        shutdown: impl FnOnce() + Send + 'static,
        delegate: Box<dyn ConnectionDelegate>,
        config: ConnectionConfig,
    ) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared {
            outbox: Mutex::new(Outbox::new()),
            work: Condvar::new(),
            pending_responses: Mutex::new(HashMap::new()),
            next_number: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            shutdown_hook: Mutex::new(Some(Box::new(shutdown))),
            config,
        });

        let writer_thread = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || writer_loop(shared, writer))
        };
        let reader_thread = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || reader_loop(shared, reader, delegate))
        };

        Self {
            handle: ConnectionHandle { shared },
            writer_thread: Some(writer_thread),
            reader_thread: Some(reader_thread),
        }
    }

    /// The sending handle; clone it freely.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// See [`ConnectionHandle::send_request`].
    pub fn send_request(&self, builder: &mut MessageBuilder) -> Result<Option<ResponseFuture>> {
        self.handle.send_request(builder)
    }

    /// See [`ConnectionHandle::send`].
    pub fn send(&self, message: MessageOut) -> Result<()> {
        self.handle.send(message)
    }

    /// See [`ConnectionHandle::flush`].
    pub fn flush(&self) {
        self.handle.flush()
    }

    /// See [`ConnectionHandle::close`].
    pub fn close(&self) {
        self.handle.close()
    }

    /// Wait for both connection threads to finish (the reader exits when the
    /// peer closes or an error occurs).
    pub fn join(mut self) {
        self.join_threads();
    }

    fn join_threads(&mut self) {
        if let Some(thread) = self.writer_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.reader_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.handle.close();
        self.join_threads();
    }
}

fn writer_loop<W: Write>(shared: Arc<Shared>, mut writer: FrameWriter<W>) {
    loop {
        let (frame, flags, number, message) = {
            let mut outbox = shared.lock_outbox();
            let mut picked = loop {
                if outbox.closed {
                    return;
                }
                match outbox.pick(shared.config.send_window) {
                    Some(message) => break message,
                    None => {
                        outbox = shared.work.wait(outbox).unwrap_or_else(|e| e.into_inner());
                    }
                }
            };
            outbox.in_flight = true;
            let (frame, flags) = picked.next_frame(shared.config.max_frame_size);
            (frame, flags, picked.number(), picked)
        };

        // The transport write happens outside the lock; an ack for this
        // message arriving meanwhile misses it and is dropped, which only
        // delays window release by one frame.
        let result = writer.send(flags, number, &frame);

        let mut outbox = shared.lock_outbox();
        outbox.in_flight = false;
        match result {
            Ok(()) => {
                if flags.more_coming() && !outbox.closed {
                    outbox.push(message);
                }
                // Wake flushers when the queues run dry, and re-run pick.
                shared.work.notify_all();
            }
            Err(err) => {
                warn!("outgoing frame write failed: {err}");
                drop(outbox);
                shared.close();
                return;
            }
        }
    }
}

fn reader_loop<R: Read>(
    shared: Arc<Shared>,
    mut reader: FrameReader<R>,
    mut delegate: Box<dyn ConnectionDelegate>,
) {
    let handle = ConnectionHandle {
        shared: Arc::clone(&shared),
    };
    // Requests initiated by the peer, keyed by its message numbers. Our own
    // requests' numbers live in `pending_responses`; the two spaces are
    // independent directions.
    let mut incoming_requests: HashMap<MessageNo, MessageIn> = HashMap::new();

    let error = loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => break None,
            Err(err) => {
                if shared.closed.load(Ordering::SeqCst) {
                    // The close path shut the socket under us.
                    break None;
                }
                break Some(ConnectionError::Frame(err));
            }
        };
        if let Err(err) = process_frame(&shared, &handle, &mut delegate, &mut incoming_requests, frame)
        {
            break Some(err);
        }
    };

    if let Some(err) = &error {
        warn!("connection failed: {err}");
    }
    shared.close();
    delegate.on_closed(error.as_ref());
}

fn process_frame(
    shared: &Arc<Shared>,
    handle: &ConnectionHandle,
    delegate: &mut Box<dyn ConnectionDelegate>,
    incoming_requests: &mut HashMap<MessageNo, MessageIn>,
    frame: Frame,
) -> Result<()> {
    let message_type = frame.flags.message_type();

    if message_type.is_ack() {
        let mut cursor = frame.payload.as_ref();
        let Some(byte_count) = read_uvarint32(&mut cursor) else {
            warn!("ignoring malformed ack for #{}", frame.number);
            return Ok(());
        };
        let mut outbox = shared.lock_outbox();
        if outbox.apply_ack(message_type, frame.number, byte_count) {
            shared.work.notify_all();
        } else {
            debug!(
                "ack for #{} matches no queued message (already drained?)",
                frame.number
            );
        }
        return Ok(());
    }

    let (mut message, is_response) = if message_type.is_response() {
        let placeholder = shared
            .pending_responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&frame.number);
        let Some(placeholder) = placeholder else {
            return Err(ProtocolError::UnexpectedResponse(frame.number).into());
        };
        (placeholder, true)
    } else {
        let placeholder = incoming_requests.remove(&frame.number).unwrap_or_else(|| {
            MessageIn::new(frame.flags, frame.number)
                .with_properties_cap(shared.config.max_properties_size)
        });
        (placeholder, false)
    };

    let outcome = message.received_frame(&frame.payload, frame.flags)?;

    if let Some(ack) = outcome.ack {
        // Acks bypass the normal queue via the urgent lane; a closed
        // connection drops them, which is fine — acks are advisory.
        let _ = handle.send(ack);
    }

    if outcome.complete {
        let message = message.into_completed();
        if message.is_request() {
            delegate.on_request_received(handle, message);
        } else {
            delegate.on_response_received(handle, message);
        }
    } else if is_response {
        shared
            .pending_responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(frame.number, message);
    } else {
        incoming_requests.insert(frame.number, message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use blip_frame::FrameFlags;
    use bytes::Bytes;

    use super::*;

    fn queued(flags: FrameFlags, number: MessageNo, len: usize) -> MessageOut {
        MessageOut::new(flags, Bytes::from(vec![0u8; len]), number)
    }

    fn request_flags() -> FrameFlags {
        FrameFlags::for_type(MessageType::Request)
    }

    #[test]
    fn pick_prefers_urgent_queue() {
        let mut outbox = Outbox::new();
        outbox.push(queued(request_flags(), 1, 8));
        outbox.push(queued(request_flags() | FrameFlags::URGENT, 2, 8));

        let first = outbox.pick(u32::MAX).expect("a message is available");
        assert_eq!(first.number(), 2);
        let second = outbox.pick(u32::MAX).expect("a message is available");
        assert_eq!(second.number(), 1);
        assert!(outbox.pick(u32::MAX).is_none());
    }

    #[test]
    fn pick_skips_messages_over_the_window() {
        let mut outbox = Outbox::new();
        let mut saturated = queued(request_flags(), 1, 4096);
        saturated.next_frame(4096); // 4096 unacked bytes
        outbox.push(saturated);
        outbox.push(queued(request_flags(), 2, 8));

        let picked = outbox.pick(1024).expect("the small message is eligible");
        assert_eq!(picked.number(), 2);
        assert!(outbox.pick(1024).is_none(), "the saturated one stays parked");

        // An ack frees the window.
        outbox.push(picked);
        assert!(outbox.apply_ack(MessageType::AckRequest, 1, 4096));
        let picked = outbox.pick(1024).expect("unblocked by the ack");
        assert_eq!(picked.number(), 1);
    }

    #[test]
    fn requeue_at_back_gives_round_robin() {
        let mut outbox = Outbox::new();
        outbox.push(queued(request_flags(), 1, 100));
        outbox.push(queued(request_flags(), 2, 100));

        let mut order = Vec::new();
        for _ in 0..4 {
            let mut message = outbox.pick(u32::MAX).expect("messages are queued");
            let (_, flags) = message.next_frame(50);
            order.push(message.number());
            if flags.more_coming() {
                outbox.push(message);
            }
        }
        assert_eq!(order, [1, 2, 1, 2]);
    }

    #[test]
    fn apply_ack_distinguishes_directions() {
        let mut outbox = Outbox::new();
        let mut request = queued(request_flags(), 5, 100);
        request.next_frame(100);
        let mut response = queued(FrameFlags::for_type(MessageType::Response), 5, 100);
        response.next_frame(100);
        outbox.push(request);
        outbox.push(response);

        assert!(outbox.apply_ack(MessageType::AckResponse, 5, 60));
        let request = outbox.normal.front().expect("request still queued");
        assert_eq!(request.unacked_bytes(), 100, "request untouched");
        let response = outbox.normal.back().expect("response still queued");
        assert_eq!(response.unacked_bytes(), 40);

        assert!(!outbox.apply_ack(MessageType::AckRequest, 99, 10));
    }
}
