use std::io::{ErrorKind, Read};

use blip_io::BlipStream;
use bytes::BytesMut;

use crate::codec::{parse_envelope, parse_frame_body, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Blocking frame source over any `Read` stream.
///
/// Each `read_frame` call pulls exactly one frame off the stream: the
/// fixed-size envelope header first, then the body it announces, both via
/// exact-length reads. No bytes are held between calls, so the stream
/// position always sits on a frame boundary.
pub struct FrameReader<T> {
    inner: T,
    body: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Wrap a stream with the default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Wrap a stream with an explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            body: BytesMut::new(),
            config,
        }
    }

    /// Block until the next frame has arrived in full.
    ///
    /// EOF reads as `FrameError::ConnectionClosed`, whether it lands between
    /// frames or in the middle of one. Oversized frames are rejected from
    /// the header alone, before their body is pulled in.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        read_exact_retrying(&mut self.inner, &mut header)?;
        let body_len = parse_envelope(&header, self.config.max_payload_size)?;

        self.body.resize(body_len, 0);
        read_exact_retrying(&mut self.inner, &mut self.body)?;
        parse_frame_body(self.body.split().freeze(), self.config.max_payload_size)
    }

    /// Give back the wrapped stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Raise or lower the payload cap for frames read from here on.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// The configuration in effect.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<BlipStream> {
    /// Create a frame reader over a `BlipStream`, applying the read timeout
    /// from the config.
    pub fn with_config_stream(inner: BlipStream, config: FrameConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}

/// Fill `buf` completely, riding out `Interrupted`. Hitting EOF with bytes
/// still owed means the peer is gone.
fn read_exact_retrying<T: Read>(inner: &mut T, mut buf: &mut [u8]) -> Result<()> {
    while !buf.is_empty() {
        match inner.read(buf) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => {
                let filled = std::mem::take(&mut buf);
                buf = &mut filled[n..];
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}
