//! Encoder settings for the two output tracks

use crate::capture::frame::Track;
use crate::capture::geometry::{Dimensions, OutputGeometry, Rect};
use crate::config::CaptureConfig;
use crate::utils::error::{WriterError, WriterResult};
use serde::{Deserialize, Serialize};

/// Video compression format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// AVC, the only codec the recorder emits
    #[default]
    H264,
}

/// Audio compression format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// AAC low complexity
    #[default]
    Aac,
}

/// Orientation applied to the encoded picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoTransform {
    /// Counter-clockwise rotation from portrait, a multiple of 90
    pub rotation_degrees: i32,
    /// Flip horizontally before rotating
    pub mirrored: bool,
}

impl VideoTransform {
    /// Transform for the configured orientation and mirroring
    pub fn from_config(config: &CaptureConfig) -> Self {
        let degrees = config.orientation.angle_offset_from_portrait().to_degrees().round() as i32;
        Self {
            rotation_degrees: degrees.rem_euclid(360),
            mirrored: config.mirroring.should_mirror(config.camera_device),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation_degrees == 0 && !self.mirrored
    }
}

/// Encoder settings for the video track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub codec: VideoCodec,
    /// Encoded picture size
    pub dimensions: Dimensions,
    /// Size of the frames handed to the writer
    pub source_dimensions: Dimensions,
    /// Region of the source frame that is encoded
    pub clean_aperture: Rect,
    /// Rotation and mirroring of the encoded picture
    pub transform: VideoTransform,
    /// Average bits per second
    pub bit_rate: u32,
    /// Frames per second
    pub frame_rate: u32,
    /// Longest run of frames between key frames
    pub max_key_frame_interval: u32,
}

/// Encoder settings for the audio track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    pub codec: AudioCodec,
    /// Samples per second per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Width of one PCM sample in the incoming buffers
    pub bits_per_sample: u16,
    /// Average bits per second
    pub bit_rate: u32,
}

/// Settings for one track's encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EncoderSettings {
    /// Configures the audio track
    Audio(AudioSettings),
    /// Configures the video track
    Video(VideoSettings),
}

impl EncoderSettings {
    pub fn track(&self) -> Track {
        match self {
            EncoderSettings::Audio(_) => Track::Audio,
            EncoderSettings::Video(_) => Track::Video,
        }
    }

    /// Video settings from the capture configuration and output geometry
    pub fn video_from_config(config: &CaptureConfig, geometry: &OutputGeometry) -> Self {
        EncoderSettings::Video(VideoSettings {
            codec: VideoCodec::H264,
            dimensions: geometry.output,
            source_dimensions: geometry.source,
            clean_aperture: geometry.clean_aperture,
            transform: VideoTransform::from_config(config),
            bit_rate: config.video_bit_rate,
            frame_rate: config.video_frame_rate,
            max_key_frame_interval: config.key_frame_interval(),
        })
    }

    /// Audio settings from the capture configuration
    pub fn audio_from_config(config: &CaptureConfig) -> Self {
        EncoderSettings::Audio(AudioSettings {
            codec: AudioCodec::Aac,
            sample_rate: config.audio_sample_rate,
            channels: config.audio_channels,
            bits_per_sample: config.audio_bytes_per_sample * 8,
            bit_rate: config.audio_bit_rate,
        })
    }

    /// Check that these settings can drive an encoder for `track`
    pub fn validate_for(&self, track: Track) -> WriterResult<()> {
        if self.track() != track {
            return Err(WriterError::InvalidSettings(format!(
                "{} settings given for the {} track",
                self.track(),
                track
            )));
        }

        match self {
            EncoderSettings::Video(video) => {
                if video.dimensions.is_empty() || video.source_dimensions.is_empty() {
                    return Err(WriterError::InvalidSettings("empty video dimensions".into()));
                }
                if video.transform.rotation_degrees % 90 != 0 {
                    return Err(WriterError::InvalidSettings(format!(
                        "unsupported rotation {}",
                        video.transform.rotation_degrees
                    )));
                }
                if video.bit_rate == 0 || video.frame_rate == 0 {
                    return Err(WriterError::InvalidSettings(
                        "video bit rate and frame rate must be non-zero".into(),
                    ));
                }
            }
            EncoderSettings::Audio(audio) => {
                if audio.sample_rate == 0
                    || audio.channels == 0
                    || audio.bits_per_sample == 0
                    || audio.bit_rate == 0
                {
                    return Err(WriterError::InvalidSettings(
                        "audio sample rate, channels and bit rate must be non-zero".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraDevice, MirroringMode, Orientation, OutputFormat};

    fn geometry(width: u32, height: u32) -> OutputGeometry {
        OutputGeometry::compute(OutputFormat::Preset, Dimensions::new(width, height))
    }

    #[test]
    fn test_track_mismatch_rejected() {
        let settings = EncoderSettings::audio_from_config(&CaptureConfig::video());
        assert!(settings.validate_for(Track::Audio).is_ok());
        assert!(matches!(
            settings.validate_for(Track::Video),
            Err(WriterError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_empty_dimensions_rejected() {
        let settings = EncoderSettings::video_from_config(&CaptureConfig::video(), &geometry(0, 720));
        assert!(settings.validate_for(Track::Video).is_err());
    }

    #[test]
    fn test_tagged_serialization() {
        let settings = EncoderSettings::video_from_config(&CaptureConfig::video(), &geometry(1280, 720));
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["bitRate"], 700_000);
        assert_eq!(json["maxKeyFrameInterval"], 30);
    }

    #[test]
    fn test_crop_from_geometry() {
        let square = OutputGeometry::compute(OutputFormat::Square, Dimensions::new(1920, 1080));
        let EncoderSettings::Video(video) = EncoderSettings::video_from_config(&CaptureConfig::video(), &square) else {
            panic!("expected video settings");
        };
        assert_eq!(video.dimensions, Dimensions::new(1080, 1080));
        assert_eq!(video.source_dimensions, Dimensions::new(1920, 1080));
        assert_eq!(video.clean_aperture, Rect::new(420.0, 0.0, 1080.0, 1080.0));
    }

    #[test]
    fn test_transform_follows_orientation_and_mirroring() {
        let back = VideoTransform::from_config(&CaptureConfig::video());
        assert!(back.is_identity());

        let front = CaptureConfig {
            camera_device: CameraDevice::Front,
            orientation: Orientation::LandscapeRight,
            ..CaptureConfig::video()
        };
        let transform = VideoTransform::from_config(&front);
        assert_eq!(transform.rotation_degrees, 270);
        assert!(transform.mirrored);

        let unmirrored = CaptureConfig {
            mirroring: MirroringMode::Off,
            orientation: Orientation::PortraitUpsideDown,
            ..front
        };
        let transform = VideoTransform::from_config(&unmirrored);
        assert_eq!(transform.rotation_degrees, 180);
        assert!(!transform.mirrored);
    }
}
