//! Worker ready handshake.
//!
//! After launch the worker loads its models and prints a fixed marker
//! (default `OCR init completed.`) on stdout. [`wait_for_ready`] reads raw
//! chunks into a fixed-size buffer until the marker shows up. The marker may
//! be split across reads; anything printed after it is returned so the line
//! channel can pick it up.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Why the ready marker was not observed.
#[derive(Debug)]
pub enum HandshakeFailure {
    /// Stdout closed before the marker appeared.
    Eof {
        /// Everything the worker printed.
        output: Vec<u8>,
    },
    /// The buffer filled up before the marker appeared.
    Overflow {
        /// Everything the worker printed.
        output: Vec<u8>,
    },
    /// Reading stdout failed.
    Io {
        /// Underlying error text.
        error: String,
        /// Everything the worker printed before the error.
        output: Vec<u8>,
    },
}

impl HandshakeFailure {
    /// Short reason, without the captured output.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Eof { .. } => "worker output closed before ready marker".into(),
            Self::Overflow { output } => {
                format!("ready marker not found in first {} bytes of output", output.len())
            }
            Self::Io { error, .. } => format!("reading worker output failed: {error}"),
        }
    }

    /// Captured stdout, lossily decoded.
    #[must_use]
    pub fn output(&self) -> String {
        let (Self::Eof { output } | Self::Overflow { output } | Self::Io { output, .. }) = self;
        String::from_utf8_lossy(output).trim().to_owned()
    }
}

/// Read `stdout` until `marker` appears within the first `limit` bytes.
///
/// Returns the bytes that followed the marker in the buffer.
///
/// # Errors
///
/// Returns a [`HandshakeFailure`] on EOF, read error, or when `limit` bytes
/// have been read without a match.
pub async fn wait_for_ready<R>(
    stdout: &mut R,
    marker: &str,
    limit: usize,
) -> std::result::Result<Vec<u8>, HandshakeFailure>
where
    R: AsyncRead + Unpin,
{
    let marker = marker.as_bytes();
    let mut buf = vec![0u8; limit];
    let mut filled = 0;

    loop {
        let n = match stdout.read(&mut buf[filled..]).await {
            Ok(n) => n,
            Err(e) => {
                buf.truncate(filled);
                return Err(HandshakeFailure::Io {
                    error: e.to_string(),
                    output: buf,
                });
            }
        };

        if n == 0 {
            buf.truncate(filled);
            return Err(HandshakeFailure::Eof { output: buf });
        }

        // Only the tail that could contain a new match needs rescanning.
        let scan_from = filled.saturating_sub(marker.len().saturating_sub(1));
        filled += n;

        if let Some(pos) = find(&buf[scan_from..filled], marker) {
            let end = scan_from + pos + marker.len();
            debug!(bytes = filled, "handshake: ready marker received");
            return Ok(buf[end..filled].to_vec());
        }

        if filled >= limit {
            return Err(HandshakeFailure::Overflow { output: buf });
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
