use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use blip_io::UnixServerSocket;
use blip_proto::{Connection, ConnectionDelegate, ConnectionHandle, MessageBuilder, MessageIn};
use tracing::{debug, warn};

use crate::cmd::ServeArgs;
use crate::exit::{connection_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let socket =
        UnixServerSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let answered = Arc::new(AtomicUsize::new(0));

    while running.load(Ordering::SeqCst) {
        let stream = match socket.accept() {
            Ok(stream) => stream,
            Err(err) => return Err(transport_error("accept failed", err)),
        };
        if let Some((uid, gid, pid)) = stream.peer_credentials() {
            debug!(uid, gid, pid, "peer connected");
        }

        let delegate = EchoDelegate {
            format,
            answered: Arc::clone(&answered),
        };
        let connection = Connection::over_stream(stream, Box::new(delegate))
            .map_err(|err| connection_error("connection setup failed", err))?;
        connection.join();

        if let Some(limit) = args.count {
            if answered.load(Ordering::SeqCst) >= limit {
                return Ok(SUCCESS);
            }
        }
    }

    Ok(SUCCESS)
}

/// Prints each incoming request and echoes its body back. The accept loop
/// checks the answer count once the peer hangs up; calling `flush` from this
/// callback would park the receive thread that acks are processed on.
struct EchoDelegate {
    format: OutputFormat,
    answered: Arc<AtomicUsize>,
}

impl ConnectionDelegate for EchoDelegate {
    fn on_request_received(&mut self, conn: &ConnectionHandle, request: Arc<MessageIn>) {
        print_message(&request, self.format);

        if !request.no_reply() {
            let mut builder = MessageBuilder::response_to(&request);
            builder.add_property("Profile", "echo");
            builder.write(request.body());
            if let Err(err) = request.respond(conn, &mut builder) {
                warn!("echo response failed: {err}");
            }
        }

        self.answered.fetch_add(1, Ordering::SeqCst);
    }

    fn on_response_received(&mut self, _conn: &ConnectionHandle, _response: Arc<MessageIn>) {}
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
