//! Bounded tail capture for child stdout/stderr diagnostics.

/// Byte cap applied to each stream tail of every job: 2 MiB.
pub const STREAM_TAIL_CAP: usize = 2 * 1024 * 1024;

/// Append-only buffer that keeps at most the last `cap` bytes of a stream.
///
/// Truncation discards from the front and aligns forward to a UTF-8
/// character boundary, so the buffer may hold slightly fewer bytes than the
/// cap but never more.
#[derive(Debug, Clone)]
pub struct TailBuffer {
    buf: Vec<u8>,
    cap: usize,
}

impl TailBuffer {
    /// Create an empty buffer with the given byte cap.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
        }
    }

    /// Append a chunk, discarding a prefix when the cap would be exceeded.
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.cap {
            // The chunk alone overflows the cap: keep only its tail.
            self.buf.clear();
            let start = char_boundary_at_or_after(chunk, chunk.len() - self.cap);
            self.buf.extend_from_slice(&chunk[start..]);
            return;
        }

        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.cap {
            let cut = char_boundary_at_or_after(&self.buf, self.buf.len() - self.cap);
            self.buf.drain(..cut);
        }
    }

    /// Current length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Retained tail decoded as UTF-8 (lossily, for non-UTF-8 streams).
    #[must_use]
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Smallest index `>= at` that does not land inside a UTF-8 sequence.
///
/// Continuation bytes match the pattern `10xxxxxx`; skipping forward past
/// them over-discards at most three bytes, keeping the result under the cap.
fn char_boundary_at_or_after(bytes: &[u8], at: usize) -> usize {
    (at..bytes.len())
        .find(|&i| (bytes[i] as i8) >= -64)
        .unwrap_or(bytes.len())
}
