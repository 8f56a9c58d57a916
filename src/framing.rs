//! Line framer.
//!
//! Accumulates bytes and emits complete `\n`-terminated frames. Scanning
//! resumes from the last scanned position rather than restarting at the
//! buffer head, so a burst of small `receive()` calls stays amortized O(n)
//! over the total bytes fed in.

use crate::errors::FramingError;

/// Stateful byte accumulator for one connection.
pub struct LineFramer {
    buf: Vec<u8>,
    /// Offset into `buf` already scanned for `\n` with no match found.
    scanned: usize,
    max_line_size: usize,
}

impl LineFramer {
    pub fn new(max_line_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line_size,
        }
    }

    /// Append `bytes` and return every newly completed frame, each including
    /// its trailing `\n`. Fails fatally if the buffer ever exceeds
    /// `max_line_size`, checked immediately on append before any draining —
    /// a completed frame that was momentarily over the ceiling still fails,
    /// it is not let through just because it later turned out to be terminated.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        self.buf.extend_from_slice(bytes);

        if self.buf.len() > self.max_line_size {
            return Err(FramingError::BufferTooLarge {
                buffered: self.buf.len(),
                max: self.max_line_size,
            });
        }

        let mut frames = Vec::new();
        loop {
            let newline_rel = self.buf[self.scanned..].iter().position(|&b| b == b'\n');
            match newline_rel {
                Some(rel) => {
                    let end = self.scanned + rel + 1;
                    frames.push(self.buf[..end].to_vec());
                    self.buf.drain(..end);
                    self.scanned = 0;
                }
                None => {
                    self.scanned = self.buf.len();
                    break;
                }
            }
        }

        Ok(frames)
    }

    /// Close the framer. Fails with the leftover bytes if the buffer is
    /// non-empty; a no-op otherwise.
    pub fn close(self) -> Result<(), FramingError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(FramingError::TruncatedLine { leftover: self.buf })
        }
    }
}
