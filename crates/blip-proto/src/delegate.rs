use std::sync::Arc;

use crate::connection::ConnectionHandle;
use crate::error::ConnectionError;
use crate::incoming::MessageIn;

/// Host-provided sink for completed incoming messages.
///
/// Callbacks run on the connection's receive thread, once per message, after
/// any future bound to the message has been fulfilled. They must not block
/// on the connection itself (waiting on a future or `flush` from here would
/// starve the thread that fulfils them); enqueueing with `send`/`respond` is
/// fine.
pub trait ConnectionDelegate: Send {
    /// A complete incoming request. The delegate may call
    /// [`MessageIn::respond`] on it exactly once (unless `NO_REPLY` is set).
    fn on_request_received(&mut self, conn: &ConnectionHandle, request: Arc<MessageIn>);

    /// A complete incoming response or error.
    fn on_response_received(&mut self, conn: &ConnectionHandle, response: Arc<MessageIn>);

    /// The connection shut down; `error` is `None` on clean close.
    fn on_closed(&mut self, error: Option<&ConnectionError>) {
        let _ = error;
    }
}

/// A delegate that ignores everything. Useful for pure-client connections
/// that only await futures.
pub struct NullDelegate;

impl ConnectionDelegate for NullDelegate {
    fn on_request_received(&mut self, _conn: &ConnectionHandle, _request: Arc<MessageIn>) {}

    fn on_response_received(&mut self, _conn: &ConnectionHandle, _response: Arc<MessageIn>) {}
}
