//! Inbound response decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Recognition succeeded; `data` holds the text blocks.
pub const CODE_SUCCESS: i64 = 100;
/// The image was read but no text was found.
pub const CODE_NO_TEXT: i64 = 101;

/// One recognized text region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    /// Region outline as ordered `[x, y]` points.
    #[serde(rename = "box")]
    pub polygon: Vec<[i32; 2]>,
    /// Recognition confidence in `[0, 1]`.
    pub score: f32,
    /// Recognized text.
    pub text: String,
}

/// Decoded worker response.
///
/// A non-success `code` is a worker-level outcome, not a transport failure:
/// callers branch on [`OcrResult::is_success`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrResult {
    /// Worker status code ([`CODE_SUCCESS`] on success).
    pub code: i64,
    /// Worker diagnostic for non-success codes; `"success"` otherwise.
    pub message: String,
    /// Text blocks; empty unless `code` is [`CODE_SUCCESS`].
    pub items: Vec<TextBlock>,
}

impl OcrResult {
    /// Whether the worker reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// All recognized text joined with newlines, in worker order.
    #[must_use]
    pub fn text(&self) -> String {
        self.items
            .iter()
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Decode one raw response line from the worker.
///
/// # Errors
///
/// - `AppError::Protocol("malformed json: …")` — the line is not JSON.
/// - `AppError::Protocol("missing numeric `code` …")` — no usable status.
/// - `AppError::Protocol("`data` …")` — a success response without a
///   well-formed item array.
pub fn parse_response(raw: &[u8]) -> Result<OcrResult> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    let code = value
        .get("code")
        .and_then(status_code)
        .ok_or_else(|| AppError::Protocol("missing numeric `code` in response".into()))?;

    if code != CODE_SUCCESS {
        let message = match value.get("data") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        };
        return Ok(OcrResult {
            code,
            message,
            items: Vec::new(),
        });
    }

    let data = value
        .get("data")
        .filter(|data| !data.is_null())
        .ok_or_else(|| AppError::Protocol("missing `data` in success response".into()))?;
    let entries = data
        .as_array()
        .ok_or_else(|| AppError::Protocol("`data` is not an array".into()))?;

    let items = entries
        .iter()
        .map(|entry| {
            TextBlock::deserialize(entry)
                .map_err(|e| AppError::Protocol(format!("malformed `data` item: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(OcrResult {
        code,
        message: "success".into(),
        items,
    })
}

/// Accept integral numbers, including ones written as `100.0`.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn status_code(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < 1e15)
            .map(|f| f as i64)
    })
}
