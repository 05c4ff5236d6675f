//! Line assembly for serial replies.
//!
//! Replies arrive as arbitrary byte chunks; this decoder buffers them and
//! yields complete `\n`-terminated lines one at a time.

use bytes::{Buf, BytesMut};

use crate::error::LineError;

/// Maximum accepted reply line length.
pub const MAX_LINE_LEN: usize = 4096;

/// Incremental decoder that assembles newline-delimited reply lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
}

impl LineDecoder {
    /// Creates a new line decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Feeds raw data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to take the next complete line.
    ///
    /// Returns `Ok(Some(line))` with the trailing `\n` stripped (a `\r` before
    /// it is kept for the status decoder to handle), `Ok(None)` if no complete
    /// line is buffered yet.
    ///
    /// # Errors
    ///
    /// Returns [`LineError::TooLong`] if the buffered data exceeds
    /// [`MAX_LINE_LEN`] without containing a newline; the buffer is cleared to
    /// resynchronize.
    pub fn next_line(&mut self) -> Result<Option<String>, LineError> {
        if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(1); // the newline itself
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }

        if self.buffer.len() > MAX_LINE_LEN {
            let size = self.buffer.len();
            self.buffer.clear();
            return Err(LineError::TooLong {
                size,
                max: MAX_LINE_LEN,
            });
        }

        Ok(None)
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
