//! Worker process plumbing.
//!
//! Everything that touches the external OCR worker directly:
//! - `codec`: newline framing for the worker's stdout.
//! - `channel`: one-request-one-response exchange over stdin/stdout.
//! - `handshake`: waiting for the ready marker after launch.
//! - `spawner`: launching, exit waiting, stderr capture, termination.

pub mod channel;
pub mod codec;
pub mod handshake;
pub mod spawner;

pub use channel::LineChannel;
pub use spawner::{launch, ExitReport, LaunchSpec, WorkerHandle};
