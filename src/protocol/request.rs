//! Outbound request payloads.

use std::path::Path;

use base64::Engine;
use serde::Serialize;

use crate::{AppError, Result};

/// Image path the worker interprets as "read the image from the clipboard".
pub const CLIPBOARD_PATH: &str = "clipboard";

/// A single recognition request.
///
/// Serializes to exactly one of `{"image_path": …}` or
/// `{"image_base64": …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OcrRequest {
    /// Image file the worker should open itself.
    #[serde(rename = "image_path")]
    Path(String),
    /// Image content, already base64-encoded.
    #[serde(rename = "image_base64")]
    Base64(String),
}

impl OcrRequest {
    /// Request referencing an image file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the path is not valid UTF-8, since the
    /// wire format carries it as a JSON string.
    pub fn path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        path.to_str()
            .map(|p| Self::Path(p.to_owned()))
            .ok_or_else(|| {
                AppError::Protocol(format!("image path is not valid UTF-8: {}", path.display()))
            })
    }

    /// Request carrying raw image bytes.
    #[must_use]
    pub fn image(bytes: &[u8]) -> Self {
        Self::Base64(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Request asking the worker to read the clipboard.
    #[must_use]
    pub fn clipboard() -> Self {
        Self::Path(CLIPBOARD_PATH.to_owned())
    }

    /// Compact single-line JSON encoding, without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialisation fails.
    pub fn to_line(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
