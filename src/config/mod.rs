//! Capture configuration
//!
//! [`CaptureConfig`] carries every recognized option. It is plain serde data
//! so hosts can persist it as JSON next to their own settings.

mod options;

pub use options::{
    CameraDevice, CameraMode, ExposureMode, FlashMode, FocusMode, MirroringMode, Orientation,
    OutputFormat, ResumeAlignment,
};

use crate::capture::frame::Track;
use crate::capture::traits::CaptureDevice;
use crate::utils::error::{CaptureError, CaptureResult};
use crate::utils::time::MediaTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_VIDEO_BIT_RATE: u32 = 87_500 * 8;
pub const DEFAULT_AUDIO_BIT_RATE: u32 = 64_000;
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// All recognized capture options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    /// Camera in use
    pub camera_device: CameraDevice,
    /// Photo or video
    pub camera_mode: CameraMode,
    /// Device orientation, applied as a rotation of recorded video
    pub orientation: Orientation,
    /// Lens focus behavior
    pub focus_mode: FocusMode,
    /// Exposure behavior
    pub exposure_mode: ExposureMode,
    /// Flash for photos, torch for video
    pub flash_mode: FlashMode,
    /// Horizontal flip of recorded video
    pub mirroring: MirroringMode,
    /// Aspect of the recorded frame
    pub output_format: OutputFormat,

    /// Bits per second
    pub video_bit_rate: u32,
    /// Bits per second
    pub audio_bit_rate: u32,
    /// Frames per second
    pub video_frame_rate: u32,
    /// Key frame every N frames; `None` uses the frame rate
    pub max_key_frame_interval: Option<u32>,

    /// Recording stops once this much media is captured; `None` is unbounded
    pub maximum_capture_duration: Option<MediaTime>,

    /// Keep the first video frame as the result thumbnail
    pub thumbnail_enabled: bool,
    /// Record the microphone when available and permitted
    pub audio_capture_enabled: bool,

    /// PCM layout of the audio buffers the device delivers
    pub audio_sample_rate: u32,
    /// Interleaved channel count
    pub audio_channels: u16,
    /// Bytes per sample per channel
    pub audio_bytes_per_sample: u16,

    /// Directory for generated output names; `None` uses the temp dir
    pub output_directory: Option<PathBuf>,
    /// Replace an existing file at the destination instead of refusing to start
    pub overwrite_existing: bool,
    /// Keep `<destination>.partial` when finalize fails instead of removing it
    pub keep_incomplete_output: bool,
    /// Output timestamp of the first frame after a resume
    pub resume_alignment: ResumeAlignment,

    /// Per-track bound on frames waiting for the processing context;
    /// fixed once the coordinator is created
    pub frame_queue_depth: usize,
    /// Events buffered per subscriber; fixed once the coordinator is created
    pub event_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_device: CameraDevice::Back,
            camera_mode: CameraMode::Photo,
            orientation: Orientation::Portrait,
            focus_mode: FocusMode::Continuous,
            exposure_mode: ExposureMode::Continuous,
            flash_mode: FlashMode::Off,
            mirroring: MirroringMode::Auto,
            output_format: OutputFormat::Preset,
            video_bit_rate: DEFAULT_VIDEO_BIT_RATE,
            audio_bit_rate: DEFAULT_AUDIO_BIT_RATE,
            video_frame_rate: DEFAULT_FRAME_RATE,
            max_key_frame_interval: None,
            maximum_capture_duration: None,
            thumbnail_enabled: true,
            audio_capture_enabled: true,
            audio_sample_rate: 44_100,
            audio_channels: 1,
            audio_bytes_per_sample: 2,
            output_directory: None,
            overwrite_existing: false,
            keep_incomplete_output: false,
            resume_alignment: ResumeAlignment::AnchorToLastFrame,
            frame_queue_depth: 64,
            event_capacity: 256,
        }
    }
}

impl CaptureConfig {
    /// Video recording defaults
    pub fn video() -> Self {
        Self {
            camera_mode: CameraMode::Video,
            ..Self::default()
        }
    }

    /// Read a configuration from a JSON file
    pub fn load(path: &Path) -> CaptureResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Write this configuration as pretty JSON
    pub fn save(&self, path: &Path) -> CaptureResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn key_frame_interval(&self) -> u32 {
        self.max_key_frame_interval
            .unwrap_or(self.video_frame_rate)
            .max(1)
    }

    /// Track whose accumulated duration is compared against the maximum
    pub fn governing_track(&self) -> Track {
        Track::Video
    }

    pub fn output_directory(&self) -> PathBuf {
        self.output_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Check the options against each other and against the active device
    pub fn validate(&self, device: &dyn CaptureDevice) -> CaptureResult<()> {
        if self.video_bit_rate == 0 {
            return Err(invalid("video bit rate must be greater than zero"));
        }
        if self.audio_bit_rate == 0 {
            return Err(invalid("audio bit rate must be greater than zero"));
        }
        if self.video_frame_rate == 0 {
            return Err(invalid("video frame rate must be greater than zero"));
        }
        if self.audio_capture_enabled
            && (self.audio_sample_rate == 0
                || self.audio_channels == 0
                || self.audio_bytes_per_sample == 0)
        {
            return Err(invalid("audio sample layout must be non-zero"));
        }
        if let Some(max) = self.maximum_capture_duration {
            if max <= MediaTime::ZERO {
                return Err(invalid("maximum capture duration must be positive"));
            }
        }
        if self.frame_queue_depth == 0 || self.event_capacity == 0 {
            return Err(invalid("queue depth and event capacity must be non-zero"));
        }

        if !device.is_available(self.camera_device) {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{:?} camera",
                self.camera_device
            )));
        }

        let rates = device.supported_frame_rates(self.camera_device);
        if !rates.contains(&self.video_frame_rate) {
            return Err(invalid(format!(
                "{} fps is not supported by the {:?} camera (supported: {:?})",
                self.video_frame_rate, self.camera_device, rates
            )));
        }

        if !device.supports_output_format(self.camera_device, self.output_format) {
            return Err(invalid(format!(
                "output format {:?} is not supported by the {:?} camera",
                self.output_format, self.camera_device
            )));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> CaptureError {
    CaptureError::Configuration(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::DeviceCapabilities;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_validate() {
        let device = DeviceCapabilities::default();
        CaptureConfig::video().validate(&device).unwrap();
    }

    #[test]
    fn test_zero_bit_rate_rejected() {
        let device = DeviceCapabilities::default();
        let config = CaptureConfig {
            video_bit_rate: 0,
            ..CaptureConfig::video()
        };
        assert!(matches!(
            config.validate(&device),
            Err(CaptureError::Configuration(_))
        ));
    }

    #[test]
    fn test_unsupported_frame_rate_rejected() {
        let device = DeviceCapabilities::default();
        let config = CaptureConfig {
            camera_device: CameraDevice::Front,
            video_frame_rate: 60,
            ..CaptureConfig::video()
        };
        let err = config.validate(&device).unwrap_err();
        assert!(err.to_string().contains("60 fps"));
    }

    #[test]
    fn test_unavailable_camera_rejected() {
        let mut device = DeviceCapabilities::default();
        device.front.available = false;
        let config = CaptureConfig {
            camera_device: CameraDevice::Front,
            ..CaptureConfig::video()
        };
        assert!(matches!(
            config.validate(&device),
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("capture.json");

        let config = CaptureConfig {
            output_format: OutputFormat::Square,
            maximum_capture_duration: Some(MediaTime::new(10, 1)),
            ..CaptureConfig::video()
        };
        config.save(&path).unwrap();

        let loaded = CaptureConfig::load(&path).unwrap();
        assert_eq!(loaded.output_format, OutputFormat::Square);
        assert_eq!(loaded.camera_mode, CameraMode::Video);
        assert_eq!(loaded.maximum_capture_duration, Some(MediaTime::new(10, 1)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CaptureConfig =
            serde_json::from_str(r#"{"cameraMode":"video","videoFrameRate":24}"#).unwrap();
        assert_eq!(config.video_frame_rate, 24);
        assert_eq!(config.audio_bit_rate, DEFAULT_AUDIO_BIT_RATE);
        assert_eq!(config.key_frame_interval(), 24);
    }
}
