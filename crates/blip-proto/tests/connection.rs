//! Loopback tests: two live connections over a Unix socketpair.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::time::Duration;

use blip_io::BlipStream;
use blip_proto::{
    Connection, ConnectionConfig, ConnectionDelegate, ConnectionHandle, MessageBuilder, MessageIn,
    NullDelegate, ResponseError,
};

const WAIT: Duration = Duration::from_secs(10);

/// Answers every request by echoing its body under `Profile: echo`.
struct EchoDelegate {
    requests_seen: Arc<AtomicUsize>,
    notify: Option<Sender<Arc<MessageIn>>>,
}

impl EchoDelegate {
    fn new() -> Self {
        Self {
            requests_seen: Arc::new(AtomicUsize::new(0)),
            notify: None,
        }
    }
}

impl ConnectionDelegate for EchoDelegate {
    fn on_request_received(&mut self, conn: &ConnectionHandle, request: Arc<MessageIn>) {
        self.requests_seen.fetch_add(1, Ordering::SeqCst);
        if let Some(notify) = &self.notify {
            let _ = notify.send(Arc::clone(&request));
        }
        if !request.no_reply() {
            let mut builder = MessageBuilder::response_to(&request);
            builder.add_property("Profile", "echo");
            builder.write(request.body());
            request
                .respond(conn, &mut builder)
                .expect("echo response should enqueue");
        }
    }

    fn on_response_received(&mut self, _conn: &ConnectionHandle, _response: Arc<MessageIn>) {}
}

/// Counts responses and forwards them over a channel.
struct RecordingDelegate {
    responses_seen: Arc<AtomicUsize>,
    notify: Sender<Arc<MessageIn>>,
}

impl ConnectionDelegate for RecordingDelegate {
    fn on_request_received(&mut self, _conn: &ConnectionHandle, _request: Arc<MessageIn>) {}

    fn on_response_received(&mut self, _conn: &ConnectionHandle, response: Arc<MessageIn>) {
        self.responses_seen.fetch_add(1, Ordering::SeqCst);
        let _ = self.notify.send(response);
    }
}

fn echo_pair() -> (Connection, Connection, Arc<AtomicUsize>) {
    let (client_stream, server_stream) = BlipStream::pair().expect("socketpair");
    let delegate = EchoDelegate::new();
    let requests_seen = Arc::clone(&delegate.requests_seen);
    let server = Connection::over_stream(server_stream, Box::new(delegate)).expect("server");
    let client = Connection::over_stream(client_stream, Box::new(NullDelegate)).expect("client");
    (client, server, requests_seen)
}

#[test]
fn request_response_roundtrip() {
    let (client, _server, requests_seen) = echo_pair();

    let mut builder = MessageBuilder::new();
    builder.add_property("Profile", "subChanges");
    builder.write(b"hello blip");

    let future = client
        .send_request(&mut builder)
        .expect("request should enqueue")
        .expect("a reply is expected");

    let response = future.wait_timeout(WAIT).expect("response should arrive");
    assert!(response.is_response());
    assert!(!response.is_error());
    assert_eq!(response.profile(), Some("echo"));
    assert_eq!(response.body(), b"hello blip");
    assert_eq!(requests_seen.load(Ordering::SeqCst), 1);
}

#[test]
fn correlation_across_concurrent_requests() {
    let (client, _server, _seen) = echo_pair();

    let futures: Vec<_> = (0..8)
        .map(|i| {
            let mut builder = MessageBuilder::new();
            builder.add_property("Profile", "echo");
            builder.write(format!("payload-{i}").as_bytes());
            client
                .send_request(&mut builder)
                .expect("request should enqueue")
                .expect("a reply is expected")
        })
        .collect();

    for (i, future) in futures.into_iter().enumerate() {
        let response = future.wait_timeout(WAIT).expect("response should arrive");
        assert_eq!(
            response.body(),
            format!("payload-{i}").as_bytes(),
            "response #{i} must correlate to its request"
        );
    }
}

#[test]
fn future_fulfils_once_and_delegate_sees_response_once() {
    let (client_stream, server_stream) = BlipStream::pair().expect("socketpair");
    let server =
        Connection::over_stream(server_stream, Box::new(EchoDelegate::new())).expect("server");

    let (tx, rx) = channel();
    let responses_seen = Arc::new(AtomicUsize::new(0));
    let delegate = RecordingDelegate {
        responses_seen: Arc::clone(&responses_seen),
        notify: tx,
    };
    let client = Connection::over_stream(client_stream, Box::new(delegate)).expect("client");

    let mut builder = MessageBuilder::new();
    builder.add_property("Profile", "echo");
    let future = client
        .send_request(&mut builder)
        .expect("request should enqueue")
        .expect("a reply is expected");

    let from_future = future.wait_timeout(WAIT).expect("future should resolve");
    let from_delegate = rx.recv_timeout(WAIT).expect("delegate should be called");

    assert!(Arc::ptr_eq(&from_future, &from_delegate));
    assert_eq!(from_future.number(), 1);
    assert_eq!(responses_seen.load(Ordering::SeqCst), 1);
    assert!(
        rx.recv_timeout(Duration::from_millis(100)).is_err(),
        "no second dispatch"
    );

    drop(client);
    drop(server);
}

#[test]
fn no_reply_request_gets_no_future_and_no_response() {
    let (client_stream, server_stream) = BlipStream::pair().expect("socketpair");
    let mut delegate = EchoDelegate::new();
    let (tx, rx) = channel();
    delegate.notify = Some(tx);
    let requests_seen = Arc::clone(&delegate.requests_seen);
    let _server = Connection::over_stream(server_stream, Box::new(delegate)).expect("server");

    let (resp_tx, resp_rx) = channel();
    let responses_seen = Arc::new(AtomicUsize::new(0));
    let client = Connection::over_stream(
        client_stream,
        Box::new(RecordingDelegate {
            responses_seen: Arc::clone(&responses_seen),
            notify: resp_tx,
        }),
    )
    .expect("client");

    let mut builder = MessageBuilder::new();
    builder.no_reply = true;
    builder.add_property("Profile", "fire-and-forget");

    let future = client.send_request(&mut builder).expect("should enqueue");
    assert!(future.is_none(), "no future for a no-reply request");

    let request = rx.recv_timeout(WAIT).expect("server should see the request");
    assert!(request.no_reply());
    assert_eq!(request.profile(), Some("fire-and-forget"));
    assert_eq!(requests_seen.load(Ordering::SeqCst), 1);

    assert!(
        resp_rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "no response must arrive"
    );
    assert_eq!(responses_seen.load(Ordering::SeqCst), 0);
}

#[test]
fn error_reply_carries_domain_and_code() {
    struct RejectingDelegate;

    impl ConnectionDelegate for RejectingDelegate {
        fn on_request_received(&mut self, conn: &ConnectionHandle, request: Arc<MessageIn>) {
            request
                .respond_with_error(conn, "BLIP", 404, Some("no such profile"))
                .expect("error reply should enqueue");
        }

        fn on_response_received(&mut self, _conn: &ConnectionHandle, _response: Arc<MessageIn>) {}
    }

    let (client_stream, server_stream) = BlipStream::pair().expect("socketpair");
    let _server =
        Connection::over_stream(server_stream, Box::new(RejectingDelegate)).expect("server");
    let client = Connection::over_stream(client_stream, Box::new(NullDelegate)).expect("client");

    let mut builder = MessageBuilder::new();
    builder.add_property("Profile", "bogus");
    let future = client
        .send_request(&mut builder)
        .expect("request should enqueue")
        .expect("a reply is expected");

    let response = future.wait_timeout(WAIT).expect("error reply should arrive");
    assert!(response.is_error());
    assert_eq!(response.error_domain(), Some("BLIP"));
    assert_eq!(response.error_code(), 404);
    assert_eq!(response.error_message(), Some("no such profile"));
}

#[test]
fn large_body_flows_through_the_ack_window() {
    // Body far larger than the send window: progress requires the receiver's
    // acks to keep releasing the sender.
    let (client_stream, server_stream) = BlipStream::pair().expect("socketpair");
    let config = ConnectionConfig {
        max_frame_size: 4096,
        send_window: 64 * 1024,
        ..ConnectionConfig::default()
    };
    let _server = Connection::over_stream_with_config(
        server_stream,
        Box::new(EchoDelegate::new()),
        config.clone(),
    )
    .expect("server");
    let client = Connection::over_stream_with_config(client_stream, Box::new(NullDelegate), config)
        .expect("client");

    let body: Vec<u8> = (0..400_000u32).map(|i| (i % 251) as u8).collect();
    let mut builder = MessageBuilder::new();
    builder.add_property("Profile", "echo");
    builder.write(&body);

    let future = client
        .send_request(&mut builder)
        .expect("request should enqueue")
        .expect("a reply is expected");

    let response = future.wait_timeout(WAIT).expect("echo should complete");
    assert_eq!(response.body().len(), body.len());
    assert_eq!(response.body(), body.as_slice());
}

#[test]
fn urgent_request_roundtrips() {
    let (client, _server, _seen) = echo_pair();

    let mut builder = MessageBuilder::new();
    builder.urgent = true;
    builder.add_property("Profile", "echo");
    builder.write(b"now");

    let future = client
        .send_request(&mut builder)
        .expect("request should enqueue")
        .expect("a reply is expected");

    let response = future.wait_timeout(WAIT).expect("response should arrive");
    assert!(response.urgent(), "urgency is inherited by the response");
    assert_eq!(response.body(), b"now");
}

#[test]
fn closing_the_connection_fails_pending_futures() {
    struct SilentDelegate;

    impl ConnectionDelegate for SilentDelegate {
        fn on_request_received(&mut self, _conn: &ConnectionHandle, _request: Arc<MessageIn>) {
            // Never responds.
        }

        fn on_response_received(&mut self, _conn: &ConnectionHandle, _response: Arc<MessageIn>) {}
    }

    let (client_stream, server_stream) = BlipStream::pair().expect("socketpair");
    let _server =
        Connection::over_stream(server_stream, Box::new(SilentDelegate)).expect("server");
    let client = Connection::over_stream(client_stream, Box::new(NullDelegate)).expect("client");

    let mut builder = MessageBuilder::new();
    builder.add_property("Profile", "never-answered");
    let future = client
        .send_request(&mut builder)
        .expect("request should enqueue")
        .expect("a reply is expected");

    client.flush();
    client.close();

    assert!(matches!(
        future.wait_timeout(WAIT),
        Err(ResponseError::ConnectionClosed)
    ));
    assert!(client.handle().is_closed());
}

#[test]
fn peer_disconnect_fails_pending_futures() {
    let (client_stream, server_stream) = BlipStream::pair().expect("socketpair");
    let client = Connection::over_stream(client_stream, Box::new(NullDelegate)).expect("client");

    let mut builder = MessageBuilder::new();
    builder.add_property("Profile", "unanswerable");
    let future = client
        .send_request(&mut builder)
        .expect("request should enqueue")
        .expect("a reply is expected");

    // The "server" never spoke BLIP; dropping the raw stream is a hangup.
    drop(server_stream);

    assert!(matches!(
        future.wait_timeout(WAIT),
        Err(ResponseError::ConnectionClosed)
    ));
}

#[test]
fn send_after_close_is_rejected() {
    let (client, _server, _seen) = echo_pair();
    client.close();

    let mut builder = MessageBuilder::new();
    builder.add_property("Profile", "late");
    assert!(client.send_request(&mut builder).is_err());
}
