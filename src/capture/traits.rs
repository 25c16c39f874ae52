//! Capture collaborator traits
//!
//! The hardware capture device and still-image pipeline live outside this
//! crate. They are consumed through the narrow interfaces defined here.

use crate::capture::frame::Track;
use crate::capture::geometry::Dimensions;
use crate::config::{CameraDevice, FlashMode, Orientation, OutputFormat};
use crate::utils::error::CaptureResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Access status for a capture medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationStatus {
    /// The user has not been asked yet
    #[default]
    NotDetermined,
    /// Access granted
    Authorized,
    /// Access refused or restricted
    Denied,
}

impl AuthorizationStatus {
    /// Whether capture may be attempted (undetermined access is requested on use)
    pub fn permits_capture(self) -> bool {
        !matches!(self, AuthorizationStatus::Denied)
    }
}

/// Query surface of the hardware capture device
pub trait CaptureDevice: Send + Sync {
    /// Whether the camera at `device` exists and can be opened
    fn is_available(&self, device: CameraDevice) -> bool;

    /// Whether an audio input exists
    fn is_audio_available(&self) -> bool;

    /// Native frame size of the active format
    fn native_dimensions(&self, device: CameraDevice) -> Dimensions;

    /// Frame rates the active format can deliver
    fn supported_frame_rates(&self, device: CameraDevice) -> Vec<u32>;

    /// Whether `format` can be produced from the current device format
    fn supports_output_format(&self, _device: CameraDevice, _format: OutputFormat) -> bool {
        true
    }

    fn has_flash(&self, _device: CameraDevice) -> bool {
        false
    }

    fn authorization_status(&self, medium: Track) -> AuthorizationStatus;
}

/// Capabilities of a single camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraCapabilities {
    /// The camera exists on this device
    pub available: bool,
    /// Native frame size of the capture preset
    pub dimensions: Dimensions,
    /// Supported frames per second
    pub frame_rates: Vec<u32>,
    /// Flash for photos, torch for video
    pub has_flash: bool,
    /// Formats the camera can produce; empty means all
    pub output_formats: Vec<OutputFormat>,
}

/// Static device description
///
/// Useful for hosts whose capture stack reports capabilities once at startup,
/// and as a stand-in device in tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    /// Rear camera
    pub back: CameraCapabilities,
    /// User facing camera
    pub front: CameraCapabilities,
    /// A microphone is present
    pub audio_available: bool,
    /// Camera access
    pub video_authorization: AuthorizationStatus,
    /// Microphone access
    pub audio_authorization: AuthorizationStatus,
}

impl DeviceCapabilities {
    fn camera(&self, device: CameraDevice) -> &CameraCapabilities {
        match device {
            CameraDevice::Back => &self.back,
            CameraDevice::Front => &self.front,
        }
    }
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            back: CameraCapabilities {
                available: true,
                dimensions: Dimensions::new(1920, 1080),
                frame_rates: vec![24, 30, 60],
                has_flash: true,
                output_formats: Vec::new(),
            },
            front: CameraCapabilities {
                available: true,
                dimensions: Dimensions::new(1280, 720),
                frame_rates: vec![24, 30],
                has_flash: false,
                output_formats: Vec::new(),
            },
            audio_available: true,
            video_authorization: AuthorizationStatus::Authorized,
            audio_authorization: AuthorizationStatus::Authorized,
        }
    }
}

impl CaptureDevice for DeviceCapabilities {
    fn is_available(&self, device: CameraDevice) -> bool {
        self.camera(device).available
    }

    fn is_audio_available(&self) -> bool {
        self.audio_available
    }

    fn native_dimensions(&self, device: CameraDevice) -> Dimensions {
        self.camera(device).dimensions
    }

    fn supported_frame_rates(&self, device: CameraDevice) -> Vec<u32> {
        self.camera(device).frame_rates.clone()
    }

    fn supports_output_format(&self, device: CameraDevice, format: OutputFormat) -> bool {
        let formats = &self.camera(device).output_formats;
        formats.is_empty() || formats.contains(&format)
    }

    fn has_flash(&self, device: CameraDevice) -> bool {
        self.camera(device).has_flash
    }

    fn authorization_status(&self, medium: Track) -> AuthorizationStatus {
        match medium {
            Track::Audio => self.audio_authorization,
            Track::Video => self.video_authorization,
        }
    }
}

/// Notifications from the hardware capture stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// Hardware temporarily taken away (another client, background suspension)
    InterruptionBegan,
    /// Hardware handed back after an interruption
    InterruptionEnded,
    /// Device gone for good
    DeviceLost { reason: String },
    /// The user changed access to `medium`
    AuthorizationChanged {
        medium: Track,
        status: AuthorizationStatus,
    },
}

/// Parameters handed to the still-image pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRequest {
    /// Camera to capture from
    pub device: CameraDevice,
    /// Orientation written into the image metadata
    pub orientation: Orientation,
    pub flash_mode: FlashMode,
    /// Also produce a thumbnail
    pub thumbnail: bool,
}

/// Result of a still capture
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoResult {
    /// Capture metadata as reported by the device
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Compressed image data
    pub encoded_image: Option<Vec<u8>>,
    /// Uncompressed pixels
    pub decoded_image: Option<Vec<u8>>,
    /// Small preview image
    pub thumbnail: Option<Vec<u8>>,
}

/// Still-image capture pipeline
#[async_trait]
pub trait StillImageCapture: Send + Sync {
    async fn capture_photo(&self, request: PhotoRequest) -> CaptureResult<PhotoResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capabilities() {
        let caps = DeviceCapabilities::default();
        assert!(caps.is_available(CameraDevice::Back));
        assert!(caps.supported_frame_rates(CameraDevice::Back).contains(&60));
        assert!(!caps.has_flash(CameraDevice::Front));
        assert!(caps.supports_output_format(CameraDevice::Front, OutputFormat::Square));
    }

    #[test]
    fn test_restricted_output_formats() {
        let mut caps = DeviceCapabilities::default();
        caps.front.output_formats = vec![OutputFormat::Preset];
        assert!(!caps.supports_output_format(CameraDevice::Front, OutputFormat::Square));
        assert!(caps.supports_output_format(CameraDevice::Back, OutputFormat::Square));
    }

    #[test]
    fn test_denied_blocks_capture() {
        assert!(AuthorizationStatus::NotDetermined.permits_capture());
        assert!(!AuthorizationStatus::Denied.permits_capture());
    }
}
