//! Request/response line channel over the worker's stdio.
//!
//! [`LineChannel`] writes one JSON request plus `\n` to the worker's stdin
//! and reads stdout through [`FramedRead`] + [`LineCodec`] until the next
//! complete line. Exactly one exchange may be in flight; the supervisor's
//! lock provides the ordering.

use std::io::Cursor;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Chain};
use tokio_util::codec::FramedRead;
use tracing::debug;

use crate::worker::codec::LineCodec;
use crate::{AppError, Result};

/// Line-oriented request channel to a worker.
///
/// Generic over the stream types so it can run against in-memory pipes.
#[derive(Debug)]
pub struct LineChannel<W, R> {
    writer: W,
    /// Handshake leftovers are read before anything new from the pipe.
    reader: FramedRead<Chain<Cursor<Vec<u8>>, R>, LineCodec>,
    /// Set while an exchange is awaiting its response. Still set on entry
    /// means the previous exchange's future was dropped mid-flight.
    in_flight: bool,
}

impl<W, R> LineChannel<W, R>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    /// Wrap a writer/reader pair.
    pub fn new(writer: W, reader: R) -> Self {
        Self::with_buffered(writer, reader, &[])
    }

    /// Wrap a writer/reader pair, seeding the read buffer with bytes that
    /// were already pulled off `reader` (e.g. during the handshake).
    pub fn with_buffered(writer: W, reader: R, buffered: &[u8]) -> Self {
        let source = Cursor::new(buffered.to_vec()).chain(reader);
        Self {
            writer,
            reader: FramedRead::new(source, LineCodec::new()),
            in_flight: false,
        }
    }

    /// Write `payload` followed by a single `\n`, then flush.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the write fails (a broken pipe
    /// usually means the worker died).
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.writer
            .write_all(payload)
            .await
            .map_err(|e| AppError::Transport(format!("write failed: {e}")))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| AppError::Transport(format!("write failed: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| AppError::Transport(format!("flush failed: {e}")))
    }

    /// Read the next non-blank line, trailing newline included.
    ///
    /// # Errors
    ///
    /// - `AppError::Transport` — EOF, a read error, or a partial line at EOF.
    /// - `AppError::Protocol("line too long …")` — the line exceeds the codec cap.
    pub async fn receive(&mut self) -> Result<Bytes> {
        loop {
            match self.reader.next().await {
                Some(Ok(line)) => {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        debug!(len = line.len(), "worker channel: skipping blank line");
                        continue;
                    }
                    return Ok(line.freeze());
                }
                Some(Err(AppError::Io(msg))) => {
                    return Err(AppError::Transport(format!("read failed: {msg}")));
                }
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(AppError::Transport(
                        "worker closed its output stream".into(),
                    ));
                }
            }
        }
    }

    /// Send one request line and wait for its response line.
    ///
    /// # Errors
    ///
    /// Propagates [`send`](Self::send) and [`receive`](Self::receive)
    /// errors. Returns `AppError::Transport` without any I/O when an earlier
    /// exchange was abandoned before its response arrived, since that stale
    /// response would otherwise be handed to this caller.
    pub async fn exchange(&mut self, payload: &[u8]) -> Result<Bytes> {
        if self.in_flight {
            return Err(AppError::Transport(
                "previous exchange was abandoned before its response arrived; \
                 worker stream is out of sync"
                    .into(),
            ));
        }

        self.in_flight = true;
        let result = self.round_trip(payload).await;
        self.in_flight = false;
        result
    }

    /// Whether an abandoned exchange left this channel out of sync.
    #[must_use]
    pub fn is_desynced(&self) -> bool {
        self.in_flight
    }

    async fn round_trip(&mut self, payload: &[u8]) -> Result<Bytes> {
        self.send(payload).await?;
        self.receive().await
    }
}
