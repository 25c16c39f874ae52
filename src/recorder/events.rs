//! Capture events
//!
//! Every notification goes through one ordered broadcast channel as a
//! [`VisionEvent`]. Subscribers that only care about some events filter by
//! [`EventKind`].

use crate::capture::frame::Track;
use crate::capture::geometry::Rect;
use crate::capture::traits::{AuthorizationStatus, PhotoResult};
use crate::config::{CameraDevice, CameraMode, ExposureMode, FocusMode, OutputFormat};
use crate::utils::error::CaptureFailure;
use crate::utils::time::MediaTime;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

/// Result of a finished recording
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResult {
    /// Session that produced the file
    pub session_id: Uuid,
    /// Finalized container
    pub path: PathBuf,
    /// Payload of the first written video frame, when thumbnails are enabled
    pub thumbnail: Option<Vec<u8>>,
    /// Recorded duration of the governing track, pauses excluded
    pub captured_duration: MediaTime,
    /// Container size on disk
    pub bytes: u64,
}

/// Terminal outcome of a recording
pub type CaptureOutcome = Result<VideoResult, CaptureFailure>;

/// Notification sent on the coordinator's event channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum VisionEvent {
    /// Preview session about to start
    SessionWillStart,
    /// Preview session running
    SessionDidStart,
    /// Preview session stopped
    SessionDidStop,
    /// Hardware taken away; an active recording is paused
    SessionInterrupted,
    /// Hardware back; a recording paused by the interruption resumes
    SessionInterruptionEnded,

    /// Camera switch requested
    CameraDeviceWillChange { from: CameraDevice, to: CameraDevice },
    /// Camera switch applied
    CameraDeviceDidChange { device: CameraDevice },
    /// Photo/video mode switch requested
    CameraModeWillChange { from: CameraMode, to: CameraMode },
    /// Photo/video mode switch applied
    CameraModeDidChange { mode: CameraMode },
    /// Output aspect change requested
    OutputFormatWillChange { from: OutputFormat, to: OutputFormat },
    /// Output aspect change applied
    OutputFormatDidChange { format: OutputFormat },
    /// Crop of the native frame changed
    CleanApertureChanged { clean_aperture: Rect },
    /// Focus adjustment starting
    FocusWillChange { mode: FocusMode },
    /// Focus adjustment applied
    FocusDidChange { mode: FocusMode },
    /// Exposure adjustment starting
    ExposureWillChange { mode: ExposureMode },
    /// Exposure adjustment applied
    ExposureDidChange { mode: ExposureMode },
    /// Flash presence of the current camera
    FlashAvailabilityChanged { available: bool },
    /// Camera or microphone access changed
    AuthorizationStatusChanged { medium: Track, status: AuthorizationStatus },

    /// Still capture about to run
    WillCapturePhoto,
    /// Still capture returned
    DidCapturePhoto,
    /// Result of the still capture
    CapturedPhoto(Result<PhotoResult, CaptureFailure>),

    /// Recording entered Starting
    DidStartVideoCapture { session_id: Uuid },
    /// Recording paused, by request or interruption
    DidPauseVideoCapture { session_id: Uuid },
    /// Recording resumed
    DidResumeVideoCapture { session_id: Uuid },
    /// Sent exactly once per recording
    CapturedVideo(CaptureOutcome),

    /// An audio sample was written at `timestamp`
    DidCaptureAudioSample { timestamp: MediaTime, captured_seconds: f64 },
    /// A video frame was written at `timestamp`
    DidCaptureVideoSample { timestamp: MediaTime, captured_seconds: f64 },
}

/// Discriminant of a [`VisionEvent`], used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// [`VisionEvent::SessionWillStart`]
    SessionWillStart,
    /// [`VisionEvent::SessionDidStart`]
    SessionDidStart,
    /// [`VisionEvent::SessionDidStop`]
    SessionDidStop,
    /// [`VisionEvent::SessionInterrupted`]
    SessionInterrupted,
    /// [`VisionEvent::SessionInterruptionEnded`]
    SessionInterruptionEnded,
    /// [`VisionEvent::CameraDeviceWillChange`]
    CameraDeviceWillChange,
    /// [`VisionEvent::CameraDeviceDidChange`]
    CameraDeviceDidChange,
    /// [`VisionEvent::CameraModeWillChange`]
    CameraModeWillChange,
    /// [`VisionEvent::CameraModeDidChange`]
    CameraModeDidChange,
    /// [`VisionEvent::OutputFormatWillChange`]
    OutputFormatWillChange,
    /// [`VisionEvent::OutputFormatDidChange`]
    OutputFormatDidChange,
    /// [`VisionEvent::CleanApertureChanged`]
    CleanApertureChanged,
    /// [`VisionEvent::FocusWillChange`]
    FocusWillChange,
    /// [`VisionEvent::FocusDidChange`]
    FocusDidChange,
    /// [`VisionEvent::ExposureWillChange`]
    ExposureWillChange,
    /// [`VisionEvent::ExposureDidChange`]
    ExposureDidChange,
    /// [`VisionEvent::FlashAvailabilityChanged`]
    FlashAvailabilityChanged,
    /// [`VisionEvent::AuthorizationStatusChanged`]
    AuthorizationStatusChanged,
    /// [`VisionEvent::WillCapturePhoto`]
    WillCapturePhoto,
    /// [`VisionEvent::DidCapturePhoto`]
    DidCapturePhoto,
    /// [`VisionEvent::CapturedPhoto`]
    CapturedPhoto,
    /// [`VisionEvent::DidStartVideoCapture`]
    DidStartVideoCapture,
    /// [`VisionEvent::DidPauseVideoCapture`]
    DidPauseVideoCapture,
    /// [`VisionEvent::DidResumeVideoCapture`]
    DidResumeVideoCapture,
    /// [`VisionEvent::CapturedVideo`]
    CapturedVideo,
    /// [`VisionEvent::DidCaptureAudioSample`]
    DidCaptureAudioSample,
    /// [`VisionEvent::DidCaptureVideoSample`]
    DidCaptureVideoSample,
}

impl VisionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            VisionEvent::SessionWillStart => EventKind::SessionWillStart,
            VisionEvent::SessionDidStart => EventKind::SessionDidStart,
            VisionEvent::SessionDidStop => EventKind::SessionDidStop,
            VisionEvent::SessionInterrupted => EventKind::SessionInterrupted,
            VisionEvent::SessionInterruptionEnded => EventKind::SessionInterruptionEnded,
            VisionEvent::CameraDeviceWillChange { .. } => EventKind::CameraDeviceWillChange,
            VisionEvent::CameraDeviceDidChange { .. } => EventKind::CameraDeviceDidChange,
            VisionEvent::CameraModeWillChange { .. } => EventKind::CameraModeWillChange,
            VisionEvent::CameraModeDidChange { .. } => EventKind::CameraModeDidChange,
            VisionEvent::OutputFormatWillChange { .. } => EventKind::OutputFormatWillChange,
            VisionEvent::OutputFormatDidChange { .. } => EventKind::OutputFormatDidChange,
            VisionEvent::CleanApertureChanged { .. } => EventKind::CleanApertureChanged,
            VisionEvent::FocusWillChange { .. } => EventKind::FocusWillChange,
            VisionEvent::FocusDidChange { .. } => EventKind::FocusDidChange,
            VisionEvent::ExposureWillChange { .. } => EventKind::ExposureWillChange,
            VisionEvent::ExposureDidChange { .. } => EventKind::ExposureDidChange,
            VisionEvent::FlashAvailabilityChanged { .. } => EventKind::FlashAvailabilityChanged,
            VisionEvent::AuthorizationStatusChanged { .. } => EventKind::AuthorizationStatusChanged,
            VisionEvent::WillCapturePhoto => EventKind::WillCapturePhoto,
            VisionEvent::DidCapturePhoto => EventKind::DidCapturePhoto,
            VisionEvent::CapturedPhoto(_) => EventKind::CapturedPhoto,
            VisionEvent::DidStartVideoCapture { .. } => EventKind::DidStartVideoCapture,
            VisionEvent::DidPauseVideoCapture { .. } => EventKind::DidPauseVideoCapture,
            VisionEvent::DidResumeVideoCapture { .. } => EventKind::DidResumeVideoCapture,
            VisionEvent::CapturedVideo(_) => EventKind::CapturedVideo,
            VisionEvent::DidCaptureAudioSample { .. } => EventKind::DidCaptureAudioSample,
            VisionEvent::DidCaptureVideoSample { .. } => EventKind::DidCaptureVideoSample,
        }
    }
}

/// Sending half of the event channel
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<VisionEvent>,
}

impl EventSender {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: VisionEvent) {
        tracing::trace!(kind = ?event.kind(), "Event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            kinds: None,
        }
    }
}

/// Receiving half, optionally restricted to some event kinds
///
/// A subscriber that falls more than the channel capacity behind skips the
/// oldest events.
pub struct EventSubscription {
    rx: broadcast::Receiver<VisionEvent>,
    kinds: Option<Vec<EventKind>>,
}

impl EventSubscription {
    /// Only deliver events of the given kinds
    pub fn filter(mut self, kinds: &[EventKind]) -> Self {
        self.kinds = Some(kinds.to_vec());
        self
    }

    fn wants(&self, event: &VisionEvent) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&event.kind()),
            None => true,
        }
    }

    /// Next matching event, or `None` once the sender is gone
    pub async fn recv(&mut self) -> Option<VisionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting
    pub fn try_recv(&mut self) -> Option<VisionEvent> {
        use broadcast::error::TryRecvError;
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_filters_by_kind() {
        let events = EventSender::new(16);
        let mut all = events.subscribe();
        let mut lifecycle = events
            .subscribe()
            .filter(&[EventKind::SessionDidStart, EventKind::SessionDidStop]);

        events.emit(VisionEvent::SessionWillStart);
        events.emit(VisionEvent::SessionDidStart);
        events.emit(VisionEvent::FocusDidChange {
            mode: FocusMode::Auto,
        });
        events.emit(VisionEvent::SessionDidStop);

        assert_eq!(lifecycle.recv().await.map(|e| e.kind()), Some(EventKind::SessionDidStart));
        assert_eq!(lifecycle.recv().await.map(|e| e.kind()), Some(EventKind::SessionDidStop));
        assert!(lifecycle.try_recv().is_none());

        let mut kinds = Vec::new();
        while let Some(event) = all.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(kinds.len(), 4);
        assert_eq!(kinds[2], EventKind::FocusDidChange);
    }

    #[tokio::test]
    async fn test_closed_channel_ends_subscription() {
        let events = EventSender::new(4);
        let mut sub = events.subscribe();
        drop(events);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_event_serializes_tagged() {
        let event = VisionEvent::CapturedVideo(Err(CaptureFailure::cancelled()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "capturedVideo");
        assert_eq!(json["payload"]["Err"]["code"], "cancelled");
    }
}
