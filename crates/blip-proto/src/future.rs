//! Single-fulfilment handoff between the connection's receive thread and a
//! caller waiting for a response.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::incoming::MessageIn;

/// Why a response future resolved without a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    /// The connection closed before the response arrived.
    #[error("connection closed before the response arrived")]
    ConnectionClosed,

    /// `wait_timeout` elapsed. The response may still arrive later and be
    /// dispatched to the delegate.
    #[error("timed out waiting for the response")]
    TimedOut,
}

#[derive(Debug)]
enum State {
    Pending,
    Done(Result<Arc<MessageIn>, ResponseError>),
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    ready: Condvar,
}

/// The waiting side: resolves once with the completed response message, or
/// with an error when the connection closes first.
pub struct ResponseFuture {
    inner: Arc<Inner>,
}

/// The fulfilling side, held by the pending `MessageIn`. Resolves at most
/// once; dropping it unfulfilled resolves the future with
/// [`ResponseError::ConnectionClosed`].
#[derive(Debug)]
pub(crate) struct ResponseSlot {
    inner: Arc<Inner>,
    resolved: bool,
}

pub(crate) fn response_pair() -> (ResponseFuture, ResponseSlot) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State::Pending),
        ready: Condvar::new(),
    });
    (
        ResponseFuture {
            inner: Arc::clone(&inner),
        },
        ResponseSlot {
            inner,
            resolved: false,
        },
    )
}

impl ResponseFuture {
    /// Block until the response arrives or the connection closes.
    pub fn wait(self) -> Result<Arc<MessageIn>, ResponseError> {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let State::Done(result) = &*state {
                return result.clone();
            }
            state = self
                .inner
                .ready
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block until the response arrives, the connection closes, or `timeout`
    /// elapses.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Arc<MessageIn>, ResponseError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let State::Done(result) = &*state {
                return result.clone();
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(ResponseError::TimedOut);
            };
            let (next, timed_out) = self
                .inner
                .ready
                .wait_timeout(state, remaining)
                .unwrap_or_else(|e| e.into_inner());
            state = next;
            if timed_out.timed_out() {
                if let State::Done(result) = &*state {
                    return result.clone();
                }
                return Err(ResponseError::TimedOut);
            }
        }
    }

    /// The resolved value, if any, without blocking.
    pub fn poll(&self) -> Option<Result<Arc<MessageIn>, ResponseError>> {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*state {
            State::Done(result) => Some(result.clone()),
            State::Pending => None,
        }
    }
}

impl ResponseSlot {
    /// Hand the completed response to the waiting side.
    pub(crate) fn fulfil(mut self, message: Arc<MessageIn>) {
        self.resolve(Ok(message));
    }

    fn resolve(&mut self, result: Result<Arc<MessageIn>, ResponseError>) {
        self.resolved = true;
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*state, State::Pending) {
            *state = State::Done(result);
            self.inner.ready.notify_all();
        }
    }
}

impl Drop for ResponseSlot {
    fn drop(&mut self) {
        if !self.resolved {
            self.resolve(Err(ResponseError::ConnectionClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use blip_frame::{FrameFlags, MessageType};

    use super::*;

    fn completed_response() -> Arc<MessageIn> {
        let mut message = MessageIn::new(FrameFlags::for_type(MessageType::Response), 1);
        let outcome = message
            .received_frame(b"\x00done", FrameFlags::for_type(MessageType::Response))
            .expect("frame should parse");
        assert!(outcome.complete);
        Arc::new(message)
    }

    #[test]
    fn fulfil_wakes_waiter() {
        let (future, slot) = response_pair();
        let response = completed_response();

        let waiter = thread::spawn(move || future.wait());
        slot.fulfil(Arc::clone(&response));

        let got = waiter.join().unwrap().expect("future should resolve");
        assert_eq!(got.body(), b"done");
    }

    #[test]
    fn fulfil_before_wait_resolves_immediately() {
        let (future, slot) = response_pair();
        slot.fulfil(completed_response());
        assert!(future.wait().is_ok());
    }

    #[test]
    fn dropping_slot_fails_the_future() {
        let (future, slot) = response_pair();
        drop(slot);
        assert!(matches!(
            future.wait(),
            Err(ResponseError::ConnectionClosed)
        ));
    }

    #[test]
    fn wait_timeout_elapses() {
        let (future, _slot) = response_pair();
        let result = future.wait_timeout(Duration::from_millis(20));
        assert!(matches!(result, Err(ResponseError::TimedOut)));
    }

    #[test]
    fn wait_timeout_resolves_when_fulfilled() {
        let (future, slot) = response_pair();
        let response = completed_response();

        let waiter = thread::spawn(move || future.wait_timeout(Duration::from_secs(5)));
        slot.fulfil(response);

        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn poll_is_nonblocking() {
        let (future, slot) = response_pair();
        assert!(future.poll().is_none());
        slot.fulfil(completed_response());
        assert!(matches!(future.poll(), Some(Ok(_))));
    }
}
