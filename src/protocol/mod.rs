//! Worker wire protocol.
//!
//! One JSON object per line in each direction:
//!
//! | Direction        | Shape                                                  |
//! |------------------|--------------------------------------------------------|
//! | request          | `{"image_path": "…"}` or `{"image_base64": "…"}`       |
//! | response, 100    | `{"code": 100, "data": [{"box", "score", "text"}, …]}` |
//! | response, other  | `{"code": N, "data": <diagnostic>}`                    |
//!
//! - `request`: [`OcrRequest`] payload construction.
//! - `response`: [`parse_response`] and the typed [`OcrResult`].

pub mod request;
pub mod response;

pub use request::{OcrRequest, CLIPBOARD_PATH};
pub use response::{parse_response, OcrResult, TextBlock, CODE_NO_TEXT, CODE_SUCCESS};
