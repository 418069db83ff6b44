//! Newline framing for the worker's stdout.
//!
//! Unlike [`tokio_util::codec::LinesCodec`], [`LineCodec`] keeps the
//! trailing `\n` and does not require UTF-8, so the façade sees exactly the
//! bytes the worker wrote. The read buffer grows as needed; a single line is
//! capped at [`MAX_LINE_BYTES`] so an unterminated stream cannot exhaust
//! memory.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use ocr_supervisor::worker::codec::LineCodec;
//!
//! let reader = FramedRead::new(child_stdout, LineCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::{AppError, Result};

/// Maximum line length accepted from the worker: 64 MiB.
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Decoder yielding one `\n`-terminated line per item, newline included.
#[derive(Debug)]
pub struct LineCodec {
    /// Bytes of the current buffer already scanned for `\n`.
    next_index: usize,
    max_length: usize,
}

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom per-line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = BytesMut;
    type Error = AppError;

    /// Split off the next complete line, or return `Ok(None)` to keep buffering.
    ///
    /// Returns `Err(AppError::Protocol("line too long: …"))` when more than
    /// the limit has been buffered without a newline.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let scan_end = src.len().min(self.max_length.saturating_add(1));
        let found = src[self.next_index..scan_end]
            .iter()
            .position(|b| *b == b'\n');

        if let Some(offset) = found {
            let end = self.next_index + offset + 1;
            self.next_index = 0;
            return Ok(Some(src.split_to(end)));
        }

        if src.len() > self.max_length {
            return Err(AppError::Protocol(format!(
                "line too long: exceeded {} bytes",
                self.max_length
            )));
        }

        self.next_index = src.len();
        Ok(None)
    }

    /// At EOF a partial line is an error: the worker died mid-response.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            Ok(None)
        } else {
            Err(AppError::Transport(format!(
                "worker output ended mid-line ({} bytes buffered)",
                src.len()
            )))
        }
    }
}
