#![forbid(unsafe_code)]

//! Supervisor for a long-running OCR worker process that speaks
//! line-delimited JSON over its stdin/stdout.

pub mod config;
pub mod errors;
pub mod protocol;
pub mod supervisor;
pub mod worker;

pub use config::{OcrArgs, SupervisorConfig};
pub use errors::{AppError, Result};
pub use supervisor::{ocr_file_once, Supervisor, SupervisorStatus};
