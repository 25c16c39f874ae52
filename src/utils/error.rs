//! Error types and handling
//!
//! Common error types used across the capture pipeline.

use crate::capture::frame::Track;
use crate::recorder::state::CaptureState;
use crate::utils::time::MediaTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the stream writer
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("{0} track already configured")]
    TrackAlreadyConfigured(Track),

    #[error("{0} track is not ready")]
    TrackNotReady(Track),

    #[error("Invalid encoder settings: {0}")]
    InvalidSettings(String),

    #[error("Writer is not accepting samples ({0})")]
    NotAppending(&'static str),

    #[error("Non-monotonic {track} timestamp {timestamp} (last written {last})")]
    NonMonotonic {
        track: Track,
        timestamp: MediaTime,
        last: MediaTime,
    },

    #[error("Finalize already requested")]
    FinalizeAlreadyRequested,

    #[error("Writer was aborted")]
    Aborted,

    #[error("Disk full")]
    DiskFull,

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("IO error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for WriterError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            WriterError::DiskFull
        } else {
            WriterError::Io(err)
        }
    }
}

/// Result type for writer operations
pub type WriterResult<T> = Result<T, WriterError>;

/// Errors that can occur while capturing
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: CaptureState,
        action: &'static str,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not available: {0}")]
    DeviceUnavailable(String),

    #[error("Device lost: {0}")]
    DeviceLost(String),

    #[error("Output file already exists: {0}")]
    OutputFileExists(String),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Capture cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Capture processor is not running")]
    ProcessorClosed,
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Stable error codes reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    /// Not classified
    Unknown,
    /// Deliberate cancellation, not a failure
    Cancelled,
    /// The session could not be started or driven
    SessionFailed,
    /// The output could not be created or finalized
    BadOutputFile,
    /// The destination already exists
    OutputFileExists,
    /// Writing a frame failed
    CaptureFailed,
    /// No space left for the output
    DiskFull,
    /// The capture device went away
    DeviceLost,
    /// Camera or microphone access refused
    AuthorizationDenied,
    /// Options rejected before start
    InvalidConfiguration,
}

/// Error payload carried on the event channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureFailure {
    /// Stable classification
    pub code: ErrorCode,
    /// Human readable detail
    pub message: String,
}

impl CaptureFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Capture cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }
}

impl ErrorCode {
    fn of_writer(error: &WriterError) -> Self {
        match error {
            WriterError::DiskFull => ErrorCode::DiskFull,
            WriterError::Io(_) => ErrorCode::BadOutputFile,
            WriterError::Aborted => ErrorCode::Cancelled,
            WriterError::InvalidSettings(_) => ErrorCode::InvalidConfiguration,
            _ => ErrorCode::CaptureFailed,
        }
    }
}

impl From<&CaptureError> for CaptureFailure {
    fn from(error: &CaptureError) -> Self {
        let code = match error {
            CaptureError::Configuration(_) => ErrorCode::InvalidConfiguration,
            CaptureError::AlreadyRecording => ErrorCode::SessionFailed,
            CaptureError::NotRecording => ErrorCode::SessionFailed,
            CaptureError::InvalidTransition { .. } => ErrorCode::SessionFailed,
            CaptureError::PermissionDenied(_) => ErrorCode::AuthorizationDenied,
            CaptureError::DeviceUnavailable(_) => ErrorCode::DeviceLost,
            CaptureError::DeviceLost(_) => ErrorCode::DeviceLost,
            CaptureError::OutputFileExists(_) => ErrorCode::OutputFileExists,
            CaptureError::Writer(e) => ErrorCode::of_writer(e),
            CaptureError::Cancelled => ErrorCode::Cancelled,
            CaptureError::Io(_) => ErrorCode::BadOutputFile,
            CaptureError::Serialization(_) => ErrorCode::Unknown,
            CaptureError::ProcessorClosed => ErrorCode::SessionFailed,
        };

        CaptureFailure {
            code,
            message: error.to_string(),
        }
    }
}

impl From<CaptureError> for CaptureFailure {
    fn from(error: CaptureError) -> Self {
        CaptureFailure::from(&error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_error_codes() {
        let failure = CaptureFailure::from(CaptureError::Writer(WriterError::DiskFull));
        assert_eq!(failure.code, ErrorCode::DiskFull);

        let failure = CaptureFailure::from(CaptureError::Cancelled);
        assert!(failure.is_cancelled());
    }

    #[test]
    fn test_storage_full_maps_to_disk_full() {
        let err = std::io::Error::from(std::io::ErrorKind::StorageFull);
        assert!(matches!(WriterError::from(err), WriterError::DiskFull));

        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(WriterError::from(err), WriterError::Io(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_enospc_maps_to_disk_full() {
        let err = std::io::Error::from_raw_os_error(28);
        assert!(matches!(WriterError::from(err), WriterError::DiskFull));
    }

    #[test]
    fn test_failure_serializes_camel_case() {
        let failure = CaptureFailure::new(ErrorCode::OutputFileExists, "exists");
        let json = serde_json::to_string(&failure).unwrap();
        assert_eq!(json, r#"{"code":"outputFileExists","message":"exists"}"#);
    }
}
