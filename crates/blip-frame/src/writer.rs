use std::io::{ErrorKind, Write};

use blip_io::BlipStream;

use crate::codec::{frame_preamble, Frame, FrameConfig, PREAMBLE_MAX};
use crate::error::{FrameError, Result};
use crate::flags::{FrameFlags, MessageNo};

/// Blocking frame sink over any `Write` stream.
///
/// A frame goes out as two writes — the preamble (envelope header, flags,
/// message number) assembled on the stack, then the payload straight from
/// the caller's slice — followed by a flush, so the frame is on the wire
/// before `send` returns. The writer itself keeps no buffer.
pub struct FrameWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Wrap a stream with the default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Wrap a stream with an explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Emit an already-assembled [`Frame`].
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.flags, frame.number, frame.payload.as_ref())
    }

    /// Emit one frame of message `number` and flush it out.
    pub fn send(&mut self, flags: FrameFlags, number: MessageNo, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        let mut preamble = [0u8; PREAMBLE_MAX];
        let preamble_len = frame_preamble(flags, number, payload.len(), &mut preamble)?;

        drain_into(&mut self.inner, &preamble[..preamble_len])?;
        drain_into(&mut self.inner, payload)?;
        self.flush()
    }

    /// Push any stream-level buffering down to the transport.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if recoverable(err.kind()) => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// A shared view of the wrapped stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Give back the wrapped stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Raise or lower the payload cap for frames sent from here on.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// The configuration in effect.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<BlipStream> {
    /// Create a frame writer over a `BlipStream`, applying the write timeout
    /// from the config.
    pub fn with_config_stream(inner: BlipStream, config: FrameConfig) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}

/// Error kinds worth spinning on rather than failing the frame. `WouldBlock`
/// shows up when a write timeout is configured on the socket.
fn recoverable(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

/// Push the whole slice into the stream. A zero-length write means the peer
/// hung up mid-frame.
fn drain_into<T: Write>(inner: &mut T, mut remaining: &[u8]) -> Result<()> {
    while !remaining.is_empty() {
        match inner.write(remaining) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => remaining = &remaining[n..],
            Err(err) if recoverable(err.kind()) => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}
