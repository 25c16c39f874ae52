//! Vision Capture - camera capture sessions with pause/resume recording.
//!
//! Raw audio and video buffers from the hardware callbacks enter through
//! [`FrameFeed`]s, are gated and rebased by the capture state machine on a
//! single processing task, and are written by the [`StreamWriter`]. Output is
//! encoded to MP4 with FFmpeg unless another muxer is plugged in.
//! [`SessionCoordinator`] ties it together and reports everything on one
//! [`VisionEvent`] channel.

pub mod capture;
pub mod config;
pub mod recorder;
pub mod utils;
pub mod writer;

pub use capture::{CaptureDevice, DeviceCapabilities, DeviceEvent, Frame, FrameFeed, StillImageCapture, Track};
pub use config::CaptureConfig;
pub use recorder::{CaptureCompletion, CaptureState, EventKind, SessionCoordinator, VideoResult, VisionEvent};
pub use utils::{CaptureError, CaptureFailure, CaptureResult, ErrorCode, MediaTime};
pub use writer::{FfmpegMuxer, StreamWriter, TimedContainerMuxer};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the default log subscriber
///
/// Honors `RUST_LOG`, falling back to `vision_capture=debug`. Does nothing if
/// a global subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vision_capture=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_tracing_twice() {
        super::init_tracing();
        super::init_tracing();
        tracing::debug!("tracing initialised");
    }
}
