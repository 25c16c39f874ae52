//! Shared utilities
//!
//! Error types and rational media time.

pub mod error;
pub mod time;

pub use error::{CaptureError, CaptureFailure, CaptureResult, ErrorCode, WriterError, WriterResult};
pub use time::MediaTime;
