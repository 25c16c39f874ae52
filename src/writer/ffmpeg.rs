//! MP4 output through FFmpeg
//!
//! Raw frames are spooled next to the output file while recording. `finish`
//! runs FFmpeg once over both spools and encodes H.264/AAC into an MP4 with
//! the index at the front of the file.
//!
//! Video is encoded at the configured constant frame rate. Each frame lands in
//! the slot its (rebased) timestamp selects: a gap left by dropped frames
//! repeats the previous frame, and a frame for an already filled slot is
//! skipped. Audio PCM is concatenated as written.

use crate::capture::frame::{Frame, Track};
use crate::utils::error::{WriterError, WriterResult};
use crate::utils::time::MediaTime;
use crate::writer::muxer::ContainerMuxer;
use crate::writer::settings::{AudioSettings, EncoderSettings, VideoSettings};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Extension of files written by [`FfmpegMuxer`]
pub const MP4_EXTENSION: &str = "mp4";

/// Pixel format of the raw video buffers, unless configured otherwise
pub const DEFAULT_PIXEL_FORMAT: &str = "bgra";

/// Bytes of one raw frame, for the pixel formats cameras deliver
pub fn raw_frame_size(pixel_format: &str, width: u32, height: u32) -> Option<usize> {
    let pixels = width as usize * height as usize;
    match pixel_format {
        "bgra" | "rgba" | "argb" | "abgr" | "bgr0" | "rgb0" => Some(pixels * 4),
        "rgb24" | "bgr24" => Some(pixels * 3),
        "yuyv422" | "uyvy422" => Some(pixels * 2),
        "nv12" | "nv21" | "yuv420p" => Some(pixels * 3 / 2),
        _ => None,
    }
}

/// FFmpeg input format for interleaved PCM of the given sample width
fn pcm_format(bits_per_sample: u16) -> Option<&'static str> {
    match bits_per_sample {
        8 => Some("u8"),
        16 => Some("s16le"),
        24 => Some("s24le"),
        32 => Some("f32le"),
        _ => None,
    }
}

/// Filter chain for crop, mirror and rotation
pub fn video_filter(settings: &VideoSettings) -> Option<String> {
    let mut filters = Vec::new();

    let crop = settings.clean_aperture;
    if settings.dimensions != settings.source_dimensions {
        filters.push(format!(
            "crop={}:{}:{}:{}",
            settings.dimensions.width,
            settings.dimensions.height,
            crop.x.round() as u32,
            crop.y.round() as u32
        ));
    }
    if settings.transform.mirrored {
        filters.push("hflip".to_string());
    }
    match settings.transform.rotation_degrees.rem_euclid(360) {
        90 => filters.push("transpose=2".to_string()),
        180 => filters.push("hflip,vflip".to_string()),
        270 => filters.push("transpose=1".to_string()),
        _ => {}
    }

    if filters.is_empty() {
        None
    } else {
        Some(filters.join(","))
    }
}

struct Spool {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    bytes: u64,
}

impl Spool {
    fn create(path: PathBuf) -> WriterResult<Self> {
        let file = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            file: Some(file),
            bytes: 0,
        })
    }

    fn write(&mut self, data: &[u8]) -> WriterResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or(WriterError::NotAppending("spool closed"))?;
        file.write_all(data)?;
        self.bytes += data.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> WriterResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn remove(&mut self) {
        self.file = None;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove spool"),
        }
    }
}

struct VideoTrack {
    settings: VideoSettings,
    spool: Spool,
    frame_size: usize,
    first_timestamp: Option<MediaTime>,
    frames: u64,
    last_frame: Vec<u8>,
}

struct AudioTrack {
    settings: AudioSettings,
    spool: Spool,
    block_align: usize,
}

/// Encodes the recording into an MP4 file with the `ffmpeg` binary
pub struct FfmpegMuxer {
    program: PathBuf,
    pixel_format: String,
    output: Option<PathBuf>,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegMuxer {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
            output: None,
            video: None,
            audio: None,
        }
    }

    /// Pixel format of the raw video payloads, as FFmpeg names it
    pub fn with_pixel_format(mut self, pixel_format: impl Into<String>) -> Self {
        self.pixel_format = pixel_format.into();
        self
    }

    /// Use a specific FFmpeg binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn spool_path(&self, suffix: &str) -> WriterResult<PathBuf> {
        let output = self
            .output
            .as_ref()
            .ok_or(WriterError::NotAppending("container not open"))?;
        let mut name = OsString::from(output.as_os_str());
        name.push(suffix);
        Ok(PathBuf::from(name))
    }

    /// Arguments of the encoding run for the configured tracks
    pub fn encoder_args(&self, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];

        if let Some(video) = &self.video {
            let source = video.settings.source_dimensions;
            args.extend([
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pixel_format".to_string(),
                self.pixel_format.clone(),
                "-video_size".to_string(),
                format!("{}x{}", source.width, source.height),
                "-framerate".to_string(),
                video.settings.frame_rate.to_string(),
                "-i".to_string(),
                video.spool.path.to_string_lossy().to_string(),
            ]);
        }
        if let Some(audio) = &self.audio {
            args.extend([
                "-f".to_string(),
                pcm_format(audio.settings.bits_per_sample)
                    .unwrap_or("s16le")
                    .to_string(),
                "-ar".to_string(),
                audio.settings.sample_rate.to_string(),
                "-ac".to_string(),
                audio.settings.channels.to_string(),
                "-i".to_string(),
                audio.spool.path.to_string_lossy().to_string(),
            ]);
        }

        if let Some(video) = &self.video {
            if let Some(filter) = video_filter(&video.settings) {
                args.extend(["-vf".to_string(), filter]);
            }
            args.extend([
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                "veryfast".to_string(),
                "-b:v".to_string(),
                video.settings.bit_rate.to_string(),
                "-g".to_string(),
                video.settings.max_key_frame_interval.max(1).to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
            ]);
        }
        if let Some(audio) = &self.audio {
            args.extend([
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                audio.settings.bit_rate.to_string(),
            ]);
        }
        if self.video.is_some() && self.audio.is_some() {
            args.extend([
                "-map".to_string(),
                "0:v".to_string(),
                "-map".to_string(),
                "1:a".to_string(),
            ]);
        }

        args.extend([
            "-movflags".to_string(),
            "+faststart".to_string(),
            // The output carries a temporary extension until it is renamed
            "-f".to_string(),
            "mp4".to_string(),
            output.to_string_lossy().to_string(),
        ]);
        args
    }

    fn write_video(&mut self, frame: &Frame) -> WriterResult<()> {
        let video = self
            .video
            .as_mut()
            .ok_or(WriterError::TrackNotReady(Track::Video))?;
        let payload = frame.payload();
        if payload.len() != video.frame_size {
            return Err(WriterError::Encoder(format!(
                "video frame is {} bytes, expected {} for {}x{} {}",
                payload.len(),
                video.frame_size,
                video.settings.source_dimensions.width,
                video.settings.source_dimensions.height,
                self.pixel_format
            )));
        }

        let timestamp = frame.presentation_timestamp();
        let first = *video.first_timestamp.get_or_insert(timestamp);
        let elapsed = (timestamp - first).seconds().max(0.0);
        let slot = (elapsed * video.settings.frame_rate as f64).round() as u64;

        if video.frames > 0 && slot < video.frames {
            tracing::trace!(slot, "Video slot already filled, skipping frame");
            return Ok(());
        }
        while video.frames < slot && !video.last_frame.is_empty() {
            video.spool.write(&video.last_frame)?;
            video.frames += 1;
        }

        video.spool.write(payload)?;
        video.frames += 1;
        video.last_frame.clear();
        video.last_frame.extend_from_slice(payload);
        Ok(())
    }

    fn write_audio(&mut self, frame: &Frame) -> WriterResult<()> {
        let audio = self
            .audio
            .as_mut()
            .ok_or(WriterError::TrackNotReady(Track::Audio))?;
        let payload = frame.payload();
        if payload.len() % audio.block_align != 0 {
            return Err(WriterError::Encoder(format!(
                "audio buffer of {} bytes is not a whole number of {}-byte sample frames",
                payload.len(),
                audio.block_align
            )));
        }
        audio.spool.write(payload)
    }

    fn remove_spools(&mut self) {
        if let Some(video) = self.video.as_mut() {
            video.spool.remove();
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.spool.remove();
        }
    }

    fn encode(&mut self) -> WriterResult<u64> {
        let output = self
            .output
            .clone()
            .ok_or(WriterError::NotAppending("container not open"))?;
        if let Some(video) = self.video.as_mut() {
            video.spool.close()?;
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.spool.close()?;
        }

        let args = self.encoder_args(&output);
        tracing::info!(program = %self.program.display(), ?args, "Starting FFmpeg encoder");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| WriterError::Encoder(format!("Failed to start FFmpeg encoder: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(WriterError::Encoder(format!(
                "FFmpeg exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        let bytes = fs::metadata(&output)?.len();
        tracing::info!(
            video_frames = self.video.as_ref().map(|v| v.frames).unwrap_or(0),
            audio_bytes = self.audio.as_ref().map(|a| a.spool.bytes).unwrap_or(0),
            bytes,
            "FFmpeg encoder finished"
        );
        Ok(bytes)
    }
}

impl ContainerMuxer for FfmpegMuxer {
    fn open(&mut self, path: &Path) -> WriterResult<()> {
        // The MP4 itself is produced by FFmpeg at finish; reserve the path now
        File::create(path)?;
        self.output = Some(path.to_path_buf());
        Ok(())
    }

    fn add_track(&mut self, settings: &EncoderSettings) -> WriterResult<()> {
        match settings {
            EncoderSettings::Video(video) => {
                if self.video.is_some() {
                    return Err(WriterError::TrackAlreadyConfigured(Track::Video));
                }
                let source = video.source_dimensions;
                let frame_size = raw_frame_size(&self.pixel_format, source.width, source.height)
                    .ok_or_else(|| {
                        WriterError::InvalidSettings(format!(
                            "unsupported pixel format {}",
                            self.pixel_format
                        ))
                    })?;
                let spool = Spool::create(self.spool_path(".video.raw")?)?;
                self.video = Some(VideoTrack {
                    settings: video.clone(),
                    spool,
                    frame_size,
                    first_timestamp: None,
                    frames: 0,
                    last_frame: Vec::new(),
                });
            }
            EncoderSettings::Audio(audio) => {
                if self.audio.is_some() {
                    return Err(WriterError::TrackAlreadyConfigured(Track::Audio));
                }
                if pcm_format(audio.bits_per_sample).is_none() {
                    return Err(WriterError::InvalidSettings(format!(
                        "unsupported sample width {}",
                        audio.bits_per_sample
                    )));
                }
                let block_align = audio.channels as usize * (audio.bits_per_sample as usize / 8);
                let spool = Spool::create(self.spool_path(".audio.pcm")?)?;
                self.audio = Some(AudioTrack {
                    settings: audio.clone(),
                    spool,
                    block_align: block_align.max(1),
                });
            }
        }
        Ok(())
    }

    fn write_sample(&mut self, frame: &Frame) -> WriterResult<()> {
        match frame.track() {
            Track::Video => self.write_video(frame),
            Track::Audio => self.write_audio(frame),
        }
    }

    fn finish(&mut self) -> WriterResult<u64> {
        let result = self.encode();
        self.remove_spools();
        result
    }

    fn file_extension(&self) -> &'static str {
        MP4_EXTENSION
    }
}

impl Drop for FfmpegMuxer {
    fn drop(&mut self) {
        self.remove_spools();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::geometry::{Dimensions, OutputGeometry};
    use crate::config::{CameraDevice, CaptureConfig, OutputFormat};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn geometry(format: OutputFormat) -> OutputGeometry {
        OutputGeometry::compute(format, Dimensions::new(4, 2))
    }

    fn video_settings(config: &CaptureConfig, format: OutputFormat) -> VideoSettings {
        match EncoderSettings::video_from_config(config, &geometry(format)) {
            EncoderSettings::Video(video) => video,
            EncoderSettings::Audio(_) => unreachable!(),
        }
    }

    fn video_frame(ms: i64, fill: u8) -> Frame {
        // 4x2 bgra
        Frame::new(
            Track::Video,
            MediaTime::from_millis(ms),
            MediaTime::new(1, 30),
            Arc::from(vec![fill; 32]),
            0,
        )
    }

    fn audio_frame(ms: i64, len: usize) -> Frame {
        Frame::new(
            Track::Audio,
            MediaTime::from_millis(ms),
            MediaTime::new(len as i64 / 2, 44_100),
            Arc::from(vec![0u8; len]),
            0,
        )
    }

    fn opened(path: &Path) -> FfmpegMuxer {
        let config = CaptureConfig::video();
        let mut muxer = FfmpegMuxer::new().with_program("/nonexistent/ffmpeg");
        muxer.open(path).unwrap();
        muxer
            .add_track(&EncoderSettings::Video(video_settings(&config, OutputFormat::Preset)))
            .unwrap();
        muxer
            .add_track(&EncoderSettings::audio_from_config(&config))
            .unwrap();
        muxer
    }

    #[test]
    fn test_raw_frame_sizes() {
        assert_eq!(raw_frame_size("bgra", 1920, 1080), Some(1920 * 1080 * 4));
        assert_eq!(raw_frame_size("nv12", 1920, 1080), Some(1920 * 1080 * 3 / 2));
        assert_eq!(raw_frame_size("yuyv422", 640, 480), Some(640 * 480 * 2));
        assert_eq!(raw_frame_size("p010le", 640, 480), None);
    }

    #[test]
    fn test_filter_crops_mirrors_and_rotates() {
        let config = CaptureConfig::video();
        assert_eq!(video_filter(&video_settings(&config, OutputFormat::Preset)), None);

        let front = CaptureConfig {
            camera_device: CameraDevice::Front,
            orientation: crate::config::Orientation::LandscapeLeft,
            ..CaptureConfig::video()
        };
        let filter = video_filter(&video_settings(&front, OutputFormat::Square)).unwrap();
        assert_eq!(filter, "crop=2:2:1:0,hflip,transpose=2");
    }

    #[test]
    fn test_encoder_args_map_both_tracks() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("clip.mp4.partial");
        let muxer = opened(&output);

        let args = muxer.encoder_args(&output);
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pixel_format bgra -video_size 4x2 -framerate 30"));
        assert!(joined.contains("-f s16le -ar 44100 -ac 1"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-b:v 700000"));
        assert!(joined.contains("-c:a aac -b:a 64000"));
        assert!(joined.contains("-map 0:v -map 1:a"));
        assert!(joined.ends_with(&format!("-movflags +faststart -f mp4 {}", output.display())));
    }

    #[test]
    fn test_video_slots_follow_timestamps() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("clip.mp4.partial");
        let mut muxer = opened(&output);

        muxer.write_sample(&video_frame(0, 1)).unwrap();
        muxer.write_sample(&video_frame(33, 2)).unwrap();
        // Two frames lost upstream: slot 4, previous frame repeated twice
        muxer.write_sample(&video_frame(133, 3)).unwrap();
        // Same slot again after a resume
        muxer.write_sample(&video_frame(133, 4)).unwrap();

        let video = muxer.video.as_mut().unwrap();
        video.spool.close().unwrap();
        assert_eq!(video.frames, 5);
        let spooled = fs::read(&video.spool.path).unwrap();
        let fills: Vec<u8> = spooled.chunks(32).map(|chunk| chunk[0]).collect();
        assert_eq!(fills, vec![1, 2, 2, 2, 3]);
    }

    #[test]
    fn test_mismatched_buffers_rejected() {
        let dir = tempdir().unwrap();
        let mut muxer = opened(&dir.path().join("clip.mp4.partial"));

        let short = Frame::new(
            Track::Video,
            MediaTime::ZERO,
            MediaTime::new(1, 30),
            Arc::from(vec![0u8; 7]),
            0,
        );
        assert!(matches!(muxer.write_sample(&short), Err(WriterError::Encoder(_))));
        assert!(matches!(
            muxer.write_sample(&audio_frame(0, 5)),
            Err(WriterError::Encoder(_))
        ));
        assert!(muxer.write_sample(&audio_frame(0, 8)).is_ok());
    }

    #[test]
    fn test_missing_encoder_fails_and_cleans_spools() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("clip.mp4.partial");
        let mut muxer = opened(&output);
        muxer.write_sample(&video_frame(0, 1)).unwrap();
        muxer.write_sample(&audio_frame(0, 8)).unwrap();

        let video_spool = dir.path().join("clip.mp4.partial.video.raw");
        let audio_spool = dir.path().join("clip.mp4.partial.audio.pcm");
        assert!(video_spool.exists() && audio_spool.exists());

        assert!(matches!(muxer.finish(), Err(WriterError::Encoder(_))));
        assert!(!video_spool.exists());
        assert!(!audio_spool.exists());
    }

    #[test]
    fn test_dropped_muxer_removes_spools() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("clip.mp4.partial");
        {
            let mut muxer = opened(&output);
            muxer.write_sample(&video_frame(0, 1)).unwrap();
        }
        assert!(!dir.path().join("clip.mp4.partial.video.raw").exists());
        assert!(!dir.path().join("clip.mp4.partial.audio.pcm").exists());
    }
}
