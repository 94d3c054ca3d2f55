//! Minimal BLIP echo server — answers every request with its own body.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --bin blip -- send /tmp/blip-echo-example/echo.sock \
//!     --profile subChanges --data 'hello' --timeout 3s

use std::fs;
use std::sync::Arc;

use blip::io::UnixServerSocket;
use blip::proto::{Connection, ConnectionDelegate, ConnectionHandle, MessageBuilder, MessageIn};

struct Echo;

impl ConnectionDelegate for Echo {
    fn on_request_received(&mut self, conn: &ConnectionHandle, request: Arc<MessageIn>) {
        eprintln!(
            "Received request #{} profile={:?} ({} body bytes)",
            request.number(),
            request.profile(),
            request.body().len()
        );
        if !request.no_reply() {
            let mut builder = MessageBuilder::response_to(&request);
            builder.add_property("Profile", "echo");
            builder.write(request.body());
            if let Err(err) = request.respond(conn, &mut builder) {
                eprintln!("respond failed: {err}");
            }
        }
    }

    fn on_response_received(&mut self, _conn: &ConnectionHandle, _response: Arc<MessageIn>) {}
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join("blip-echo-example");
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("echo.sock");

    let socket = UnixServerSocket::bind(&sock_path)?;
    eprintln!("Listening on {}", sock_path.display());

    loop {
        let stream = socket.accept()?;
        eprintln!("Peer connected");
        let connection = Connection::over_stream(stream, Box::new(Echo))?;
        connection.join();
        eprintln!("Peer disconnected");
    }
}
