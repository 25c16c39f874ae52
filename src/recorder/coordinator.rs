//! Session coordinator
//!
//! Top-level entry point. Validates configuration, owns the frame feeds and
//! the processing task, and exposes the capture lifecycle, live settings and
//! photo capture. All notifications go out on one event channel.

use super::events::{EventSender, EventSubscription, VisionEvent};
use super::processor::{CaptureCompletion, Command, ProcessorHandle};
use super::state::{CaptureState, RecordingSession, RequiredTracks, SessionSnapshot};
use crate::capture::frame::Track;
use crate::capture::geometry::{point_of_interest, OutputGeometry, Point, Rect};
use crate::capture::source::{AudioFormat, FrameFeed, FrameSource};
use crate::capture::traits::{
    AuthorizationStatus, CaptureDevice, DeviceEvent, PhotoRequest, PhotoResult, StillImageCapture,
};
use crate::config::{CameraDevice, CameraMode, CaptureConfig, ExposureMode, FlashMode, FocusMode, OutputFormat};
use crate::utils::error::{CaptureError, CaptureFailure, CaptureResult};
use crate::writer::ffmpeg::FfmpegMuxer;
use crate::writer::muxer::ContainerMuxer;
use crate::writer::stream::StreamWriter;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Builds the muxer for each new recording
pub type MuxerFactory = Arc<dyn Fn() -> Box<dyn ContainerMuxer> + Send + Sync>;

/// Binds frame source, state machine and writer together
pub struct SessionCoordinator {
    config: RwLock<CaptureConfig>,
    device: Arc<dyn CaptureDevice>,
    events: EventSender,
    source: FrameSource,
    audio_feed: FrameFeed,
    video_feed: FrameFeed,
    processor: ProcessorHandle,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    muxer_factory: MuxerFactory,
    preview_active: AtomicBool,
    /// Last focus point of interest, normalized device coordinates
    focus_point: RwLock<Option<Point>>,
    /// Microphone access was denied while idle; audio is skipped next time
    audio_denied: AtomicBool,
}

impl SessionCoordinator {
    /// Create a coordinator and spawn its processing task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: CaptureConfig, device: Arc<dyn CaptureDevice>) -> Self {
        let events = EventSender::new(config.event_capacity);
        let source = FrameSource::new(config.video_frame_rate.max(1), audio_format(&config));
        let (audio_feed, audio_rx) = FrameFeed::channel(Track::Audio, source.clone(), config.frame_queue_depth);
        let (video_feed, video_rx) = FrameFeed::channel(Track::Video, source.clone(), config.frame_queue_depth);
        let snapshot = Arc::new(RwLock::new(SessionSnapshot::default()));
        let processor = ProcessorHandle::spawn(audio_rx, video_rx, events.clone(), Arc::clone(&snapshot));

        let geometry = OutputGeometry::compute(config.output_format, device.native_dimensions(config.camera_device));
        source.set_output_geometry(geometry);

        Self {
            config: RwLock::new(config),
            device,
            events,
            source,
            audio_feed,
            video_feed,
            processor,
            snapshot,
            muxer_factory: Arc::new(|| Box::new(FfmpegMuxer::new()) as Box<dyn ContainerMuxer>),
            preview_active: AtomicBool::new(false),
            focus_point: RwLock::new(None),
            audio_denied: AtomicBool::new(false),
        }
    }

    /// Use a different container muxer for future recordings
    ///
    /// The default encodes MP4 with FFmpeg from BGRA frames.
    pub fn with_muxer_factory(mut self, factory: MuxerFactory) -> Self {
        self.muxer_factory = factory;
        self
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// Entry point for the audio hardware callback
    pub fn audio_feed(&self) -> FrameFeed {
        self.audio_feed.clone()
    }

    /// Entry point for the video hardware callback
    pub fn video_feed(&self) -> FrameFeed {
        self.video_feed.clone()
    }

    pub fn config(&self) -> CaptureConfig {
        self.config.read().clone()
    }

    /// Replace options that do not emit change events
    ///
    /// Rejected while a recording is active. `frame_queue_depth` and
    /// `event_capacity` size channels built in [`SessionCoordinator::new`]
    /// and cannot change afterwards.
    pub fn update_config(&self, update: impl FnOnce(&mut CaptureConfig)) -> CaptureResult<()> {
        self.ensure_not_recording()?;
        let mut config = self.config.write();
        let mut updated = config.clone();
        update(&mut updated);
        if updated.frame_queue_depth != config.frame_queue_depth {
            return Err(CaptureError::Configuration(
                "frame queue depth is fixed when the coordinator is created".into(),
            ));
        }
        if updated.event_capacity != config.event_capacity {
            return Err(CaptureError::Configuration(
                "event capacity is fixed when the coordinator is created".into(),
            ));
        }
        self.source.set_frame_rate(updated.video_frame_rate);
        self.source.set_audio_format(audio_format(&updated));
        *config = updated;
        Ok(())
    }

    pub fn state(&self) -> CaptureState {
        self.snapshot.read().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    pub fn is_recording(&self) -> bool {
        self.state().is_active()
    }

    pub fn captured_audio_seconds(&self) -> f64 {
        self.snapshot.read().captured_audio_seconds
    }

    pub fn captured_video_seconds(&self) -> f64 {
        self.snapshot.read().captured_video_seconds
    }

    fn ensure_not_recording(&self) -> CaptureResult<()> {
        if self.is_recording() {
            return Err(CaptureError::AlreadyRecording);
        }
        Ok(())
    }

    // -- preview session --

    pub fn is_session_active(&self) -> bool {
        self.preview_active.load(Ordering::SeqCst)
    }

    pub fn start_preview(&self) {
        if self.is_session_active() {
            return;
        }
        tracing::info!("Starting preview session");
        self.events.emit(VisionEvent::SessionWillStart);
        self.preview_active.store(true, Ordering::SeqCst);
        self.events.emit(VisionEvent::SessionDidStart);
    }

    /// Stop the preview session, ending an active recording first
    ///
    /// A recording still waiting for its tracks is cancelled.
    pub async fn stop_preview(&self) {
        if !self.is_session_active() {
            return;
        }
        match self.state() {
            CaptureState::Recording | CaptureState::Paused => {
                if let Err(e) = self.end_video_capture().await {
                    tracing::warn!(error = %e, "Failed to end recording while stopping preview");
                }
            }
            CaptureState::Starting => {
                if let Err(e) = self.cancel_video_capture().await {
                    tracing::warn!(error = %e, "Failed to cancel starting recording while stopping preview");
                }
            }
            _ => {}
        }
        self.preview_active.store(false, Ordering::SeqCst);
        tracing::info!("Preview session stopped");
        self.events.emit(VisionEvent::SessionDidStop);
    }

    // -- video capture --

    /// Start recording to `destination`, or to a generated name in the
    /// configured output directory
    ///
    /// Returns once the session is Starting; the returned completion resolves
    /// with the terminal outcome.
    pub async fn start_video_capture(&self, destination: Option<PathBuf>) -> CaptureResult<CaptureCompletion> {
        if self.is_recording() {
            return Err(CaptureError::AlreadyRecording);
        }

        let config = self.config();
        if config.camera_mode != CameraMode::Video {
            return Err(CaptureError::Configuration(
                "video capture requires video camera mode".into(),
            ));
        }
        if let Err(e) = config.validate(self.device.as_ref()) {
            tracing::warn!(error = %e, "Rejected capture configuration");
            return Err(e);
        }
        if !self.device.authorization_status(Track::Video).permits_capture() {
            return Err(CaptureError::PermissionDenied("camera access denied".into()));
        }

        let required = RequiredTracks {
            audio: self.audio_permitted(&config),
            video: true,
        };

        let muxer = (self.muxer_factory)();
        let destination = destination.unwrap_or_else(|| {
            config
                .output_directory()
                .join(format!("video_{}.{}", Uuid::new_v4(), muxer.file_extension()))
        });
        if destination.exists() && !config.overwrite_existing {
            return Err(CaptureError::OutputFileExists(destination.display().to_string()));
        }

        let geometry = OutputGeometry::compute(
            config.output_format,
            self.device.native_dimensions(config.camera_device),
        );
        self.source.set_output_geometry(geometry);
        self.source.set_frame_rate(config.video_frame_rate);
        self.source.set_audio_format(audio_format(&config));

        let writer = StreamWriter::new(destination.clone(), muxer)
            .keep_incomplete_output(config.keep_incomplete_output);
        let session = RecordingSession::new(destination, config, required);

        self.processor.start(session, writer, geometry).await
    }

    fn audio_permitted(&self, config: &CaptureConfig) -> bool {
        if !config.audio_capture_enabled {
            return false;
        }
        if !self.device.is_audio_available() {
            tracing::warn!("No audio input available, recording video only");
            return false;
        }
        let status = self.device.authorization_status(Track::Audio);
        if self.audio_denied.load(Ordering::SeqCst) || !status.permits_capture() {
            tracing::warn!("Microphone access denied, recording video only");
            return false;
        }
        true
    }

    pub async fn pause_video_capture(&self) -> CaptureResult<()> {
        self.processor.request(Command::Pause).await
    }

    pub async fn resume_video_capture(&self) -> CaptureResult<()> {
        self.processor.request(Command::Resume).await
    }

    /// Request the stop; the outcome arrives on the completion and as a
    /// captured-video event
    pub async fn end_video_capture(&self) -> CaptureResult<()> {
        self.processor.request(Command::End).await
    }

    /// Abort the recording; nothing remains at the destination afterwards
    pub async fn cancel_video_capture(&self) -> CaptureResult<()> {
        self.processor.request(Command::Cancel).await
    }

    // -- device notifications --

    pub async fn handle_device_event(&self, event: DeviceEvent) -> CaptureResult<()> {
        match &event {
            DeviceEvent::InterruptionBegan => {
                tracing::info!("Capture session interrupted");
                self.events.emit(VisionEvent::SessionInterrupted);
            }
            DeviceEvent::InterruptionEnded => {
                tracing::info!("Capture session interruption ended");
                self.events.emit(VisionEvent::SessionInterruptionEnded);
            }
            DeviceEvent::DeviceLost { reason } => {
                tracing::error!(%reason, "Capture device lost");
            }
            DeviceEvent::AuthorizationChanged { medium, status } => {
                tracing::info!(%medium, ?status, "Authorization status changed");
                if *medium == Track::Audio {
                    self.audio_denied
                        .store(*status == AuthorizationStatus::Denied, Ordering::SeqCst);
                }
                self.events.emit(VisionEvent::AuthorizationStatusChanged {
                    medium: *medium,
                    status: *status,
                });
            }
        }
        self.processor.send(Command::Device(event)).await
    }

    // -- live settings --

    pub fn set_camera_device(&self, device: CameraDevice) -> CaptureResult<()> {
        let current = self.config.read().camera_device;
        if current == device {
            return Ok(());
        }
        self.ensure_not_recording()?;
        if !self.device.is_available(device) {
            return Err(CaptureError::DeviceUnavailable(format!("{:?} camera", device)));
        }

        self.events.emit(VisionEvent::CameraDeviceWillChange {
            from: current,
            to: device,
        });
        self.config.write().camera_device = device;
        tracing::info!(?device, "Camera device changed");
        self.events.emit(VisionEvent::CameraDeviceDidChange { device });
        self.events.emit(VisionEvent::FlashAvailabilityChanged {
            available: self.device.has_flash(device),
        });
        self.refresh_geometry();
        Ok(())
    }

    pub fn set_camera_mode(&self, mode: CameraMode) -> CaptureResult<()> {
        let current = self.config.read().camera_mode;
        if current == mode {
            return Ok(());
        }
        self.ensure_not_recording()?;

        self.events.emit(VisionEvent::CameraModeWillChange { from: current, to: mode });
        self.config.write().camera_mode = mode;
        self.events.emit(VisionEvent::CameraModeDidChange { mode });
        Ok(())
    }

    pub fn set_output_format(&self, format: OutputFormat) -> CaptureResult<()> {
        let (current, camera) = {
            let config = self.config.read();
            (config.output_format, config.camera_device)
        };
        if current == format {
            return Ok(());
        }
        self.ensure_not_recording()?;
        if !self.device.supports_output_format(camera, format) {
            return Err(CaptureError::Configuration(format!(
                "output format {:?} is not supported by the {:?} camera",
                format, camera
            )));
        }

        self.events.emit(VisionEvent::OutputFormatWillChange {
            from: current,
            to: format,
        });
        self.config.write().output_format = format;
        self.events.emit(VisionEvent::OutputFormatDidChange { format });
        self.refresh_geometry();
        Ok(())
    }

    pub fn set_focus_mode(&self, mode: FocusMode) {
        self.events.emit(VisionEvent::FocusWillChange { mode });
        self.config.write().focus_mode = mode;
        self.events.emit(VisionEvent::FocusDidChange { mode });
    }

    /// Focus once on a tapped point of the preview
    ///
    /// `view_point` is in the coordinates of `preview_frame`. Returns the
    /// point of interest handed to the device. Switches to auto focus, which
    /// settles and stays put until the focus mode is changed again.
    pub fn focus_at_adjusted_point(&self, view_point: Point, preview_frame: Rect) -> Point {
        let point = point_of_interest(view_point, preview_frame);
        let mode = FocusMode::Auto;
        self.events.emit(VisionEvent::FocusWillChange { mode });
        self.config.write().focus_mode = mode;
        *self.focus_point.write() = Some(point);
        tracing::debug!(x = point.x, y = point.y, "Focus point of interest set");
        self.events.emit(VisionEvent::FocusDidChange { mode });
        point
    }

    pub fn focus_point(&self) -> Option<Point> {
        *self.focus_point.read()
    }

    pub fn set_exposure_mode(&self, mode: ExposureMode) {
        self.events.emit(VisionEvent::ExposureWillChange { mode });
        self.config.write().exposure_mode = mode;
        self.events.emit(VisionEvent::ExposureDidChange { mode });
    }

    /// Flash modes other than off need a camera with a flash
    pub fn set_flash_mode(&self, mode: FlashMode) -> CaptureResult<()> {
        let camera = self.config.read().camera_device;
        if mode != FlashMode::Off && !self.device.has_flash(camera) {
            return Err(CaptureError::Configuration(format!(
                "the {:?} camera has no flash",
                camera
            )));
        }
        self.config.write().flash_mode = mode;
        Ok(())
    }

    pub fn is_flash_available(&self) -> bool {
        self.device.has_flash(self.config.read().camera_device)
    }

    /// Region of the native frame that ends up in the output
    pub fn clean_aperture(&self) -> Rect {
        self.output_geometry().clean_aperture
    }

    pub fn output_geometry(&self) -> OutputGeometry {
        let config = self.config.read();
        OutputGeometry::compute(
            config.output_format,
            self.device.native_dimensions(config.camera_device),
        )
    }

    fn refresh_geometry(&self) {
        let geometry = self.output_geometry();
        self.source.set_output_geometry(geometry);
        self.events.emit(VisionEvent::CleanApertureChanged {
            clean_aperture: geometry.clean_aperture,
        });
    }

    // -- photo capture --

    pub async fn capture_photo(&self, capturer: &dyn StillImageCapture) -> CaptureResult<PhotoResult> {
        let config = self.config();
        if config.camera_mode != CameraMode::Photo {
            return Err(CaptureError::Configuration(
                "photo capture requires photo camera mode".into(),
            ));
        }
        if !self.device.authorization_status(Track::Video).permits_capture() {
            return Err(CaptureError::PermissionDenied("camera access denied".into()));
        }

        let request = PhotoRequest {
            device: config.camera_device,
            orientation: config.orientation,
            flash_mode: config.flash_mode,
            thumbnail: config.thumbnail_enabled,
        };

        self.events.emit(VisionEvent::WillCapturePhoto);
        let result = capturer.capture_photo(request).await;
        self.events.emit(VisionEvent::DidCapturePhoto);

        match &result {
            Ok(photo) => {
                tracing::info!(metadata_keys = photo.metadata.len(), "Photo captured");
                self.events.emit(VisionEvent::CapturedPhoto(Ok(photo.clone())));
            }
            Err(e) => {
                tracing::error!(error = %e, "Photo capture failed");
                self.events.emit(VisionEvent::CapturedPhoto(Err(CaptureFailure::from(e))));
            }
        }
        result
    }
}

fn audio_format(config: &CaptureConfig) -> AudioFormat {
    AudioFormat {
        sample_rate: config.audio_sample_rate,
        channels: config.audio_channels,
        bytes_per_sample: config.audio_bytes_per_sample,
    }
}
