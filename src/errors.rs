//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every supervisor failure mode.
///
/// Payloads are plain strings so a recorded error can be cloned and handed
/// to every caller that runs into it (see the sticky fatal error kept by
/// [`Supervisor`](crate::supervisor::Supervisor)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Worker executable is missing or is not a regular file.
    NotFound(String),
    /// Worker process could not be spawned or its pipes captured.
    Setup(String),
    /// Ready marker was not observed before EOF, overflow, or timeout.
    Handshake(String),
    /// Read or write failure on the worker's pipes mid-exchange.
    Transport(String),
    /// Bytes were received from the worker but were not a well-formed response.
    Protocol(String),
    /// Operation attempted in a state that does not allow it (e.g. after shutdown).
    Lifecycle(String),
    /// Local file-system or I/O failure outside the worker pipes.
    Io(String),
}

impl AppError {
    /// Whether this error belongs to the setup class (nothing was left running).
    #[must_use]
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Setup(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Setup(msg) => write!(f, "setup: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Lifecycle(msg) => write!(f, "lifecycle: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
