use bytes::{BufMut, Bytes, BytesMut};

/// Append-only byte accumulator with a reserve-then-rewrite primitive.
///
/// `reserve_space` leaves a zeroed hole whose position stays valid until the
/// buffer is extracted or reset; `rewrite` fills it in once the final bytes
/// are known. Used for the properties-size prefix of a message payload.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: BytesMut,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append bytes.
    pub fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a single byte.
    pub fn push(&mut self, byte: u8) {
        self.buf.put_u8(byte);
    }

    /// Append `n` zero bytes and return their start position.
    pub fn reserve_space(&mut self, n: usize) -> usize {
        let pos = self.buf.len();
        self.buf.put_bytes(0, n);
        pos
    }

    /// Overwrite previously written bytes. The target region must already
    /// exist; rewriting a different length than was reserved is a programmer
    /// error.
    pub fn rewrite(&mut self, pos: usize, bytes: &[u8]) {
        debug_assert!(
            pos + bytes.len() <= self.buf.len(),
            "rewrite outside the written region"
        );
        self.buf[pos..pos + bytes.len()].copy_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the accumulated bytes, leaving the writer empty.
    pub fn extract_output(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Discard everything written so far.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}
