//! Capture option enums

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Camera position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraDevice {
    /// Rear facing camera
    #[default]
    Back,
    /// User facing camera
    Front,
}

/// What the session captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    /// Still images
    #[default]
    Photo,
    /// Recordings with optional audio
    Video,
}

/// Capture orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    /// Home button at the bottom
    #[default]
    Portrait,
    /// Home button at the top
    PortraitUpsideDown,
    /// Home button on the right
    LandscapeRight,
    /// Home button on the left
    LandscapeLeft,
}

impl Orientation {
    /// Rotation (radians) from portrait to this orientation
    pub fn angle_offset_from_portrait(self) -> f64 {
        match self {
            Orientation::Portrait => 0.0,
            Orientation::PortraitUpsideDown => PI,
            Orientation::LandscapeRight => -FRAC_PI_2,
            Orientation::LandscapeLeft => FRAC_PI_2,
        }
    }
}

/// Lens focus behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusMode {
    /// Lens position held
    Locked,
    /// Focus once, then lock
    Auto,
    /// Refocus whenever the scene changes
    #[default]
    Continuous,
}

/// Exposure behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMode {
    /// Exposure held
    Locked,
    /// Expose once, then lock
    Auto,
    /// Adjust whenever the scene changes
    #[default]
    Continuous,
}

/// Flash (photo) and torch (video) mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    /// Never fire
    #[default]
    Off,
    /// Always fire
    On,
    /// Fire in low light
    Auto,
}

/// Horizontal flip of recorded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirroringMode {
    /// Mirror the front camera only
    #[default]
    Auto,
    /// Mirror every camera
    On,
    /// Never mirror
    Off,
}

impl MirroringMode {
    /// Auto mirrors the front camera only
    pub fn should_mirror(self, device: CameraDevice) -> bool {
        match self {
            MirroringMode::Auto => device == CameraDevice::Front,
            MirroringMode::On => true,
            MirroringMode::Off => false,
        }
    }
}

/// Output aspect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Native size of the session preset
    #[default]
    Preset,
    /// 1:1
    Square,
    /// 16:9
    Widescreen,
    /// 4:3
    Standard,
}

/// Where the first frame after a resume lands on the output timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResumeAlignment {
    /// On the last written timestamp of the track
    #[default]
    AnchorToLastFrame,
    /// One frame duration after the last written timestamp
    ContinueAfterLastFrame,
}
