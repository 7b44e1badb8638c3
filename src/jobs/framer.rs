//! Incremental LF line splitter for child stdout streams.
//!
//! Stdout arrives in arbitrary byte chunks that can split a JSONL line, or a
//! multi-byte UTF-8 sequence, anywhere. The framer buffers bytes and decodes
//! only at line granularity, so chunk boundaries never corrupt a line.

/// Splits a byte stream into trimmed, non-empty lines.
///
/// Complete lines are returned from [`LineFramer::push`]; the unterminated
/// tail is retained for the next chunk. [`LineFramer::flush`] yields the
/// final partial line at end of stream, mirroring the `decode_eof` behavior
/// of a lines codec.
#[derive(Debug, Default)]
pub struct LineFramer {
    remainder: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a chunk and return every line completed by it.
    ///
    /// Empty and whitespace-only lines are discarded silently. `\r\n`
    /// receives no special handling beyond trimming.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.remainder.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.remainder.iter().position(|&b| b == b'\n') {
            let rest = self.remainder.split_off(pos + 1);
            let raw = std::mem::replace(&mut self.remainder, rest);
            if let Some(line) = decode_trimmed(&raw) {
                lines.push(line);
            }
        }
        lines
    }

    /// Drain the retained partial line, if any, at end of stream.
    pub fn flush(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.remainder);
        decode_trimmed(&raw)
    }

    /// Bytes currently buffered awaiting a terminator.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.remainder.len()
    }
}

/// Lossily decode a raw line, trim it, and drop it when empty.
fn decode_trimmed(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
