//! Stream writer
//!
//! Owns the output resource of one recording. Tracks are configured lazily,
//! samples are appended in arrival order per track, and the container is
//! finalized (or aborted) exactly once.
//!
//! While recording, data goes to `<destination>.partial`; only a successful
//! finalize moves it onto the destination path.

use crate::capture::frame::{Frame, Track};
use crate::utils::error::{WriterError, WriterResult};
use crate::utils::time::MediaTime;
use crate::writer::muxer::ContainerMuxer;
use crate::writer::settings::EncoderSettings;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle of the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterStatus {
    /// No track configured yet
    Idle,
    /// At least one track configured; samples are accepted
    Writing,
    /// Output handed to a finalize job
    Finalizing,
    /// Output moved onto the destination
    Finished,
    /// A write or finalize error; nothing more is accepted
    Failed,
    /// Discarded by [`StreamWriter::abort`]
    Aborted,
}

impl WriterStatus {
    fn as_str(self) -> &'static str {
        match self {
            WriterStatus::Idle => "idle",
            WriterStatus::Writing => "writing",
            WriterStatus::Finalizing => "finalizing",
            WriterStatus::Finished => "finished",
            WriterStatus::Failed => "failed",
            WriterStatus::Aborted => "aborted",
        }
    }
}

/// Description of a finished output file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDescriptor {
    /// Final destination path
    pub path: PathBuf,
    /// Container size on disk
    pub bytes: u64,
    /// Audio samples appended
    pub audio_samples: u64,
    /// Video frames appended
    pub video_samples: u64,
}

/// Outcome of [`StreamWriter::abort`]
///
/// Abort always succeeds; failures to delete files are only reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbortReport {
    /// Files deleted
    pub removed: Vec<PathBuf>,
    /// Files that could not be deleted, with the reason
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct TrackSlot {
    settings: Option<EncoderSettings>,
    last_timestamp: Option<MediaTime>,
    samples: u64,
}

/// Single-session writer around a [`ContainerMuxer`]
pub struct StreamWriter {
    destination: PathBuf,
    partial: PathBuf,
    muxer: Option<Box<dyn ContainerMuxer>>,
    opened: bool,
    status: WriterStatus,
    tracks: [TrackSlot; 2],
    cancel_flag: Arc<AtomicBool>,
    keep_incomplete: bool,
    finalize_requested: bool,
    result: Option<OutputDescriptor>,
}

impl StreamWriter {
    pub fn new(destination: PathBuf, muxer: Box<dyn ContainerMuxer>) -> Self {
        let partial = partial_path(&destination);
        Self {
            destination,
            partial,
            muxer: Some(muxer),
            opened: false,
            status: WriterStatus::Idle,
            tracks: Default::default(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            keep_incomplete: false,
            finalize_requested: false,
            result: None,
        }
    }

    /// Keep `<destination>.partial` when finalize fails
    pub fn keep_incomplete_output(mut self, keep: bool) -> Self {
        self.keep_incomplete = keep;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial
    }

    pub fn status(&self) -> WriterStatus {
        self.status
    }

    pub fn is_track_ready(&self, track: Track) -> bool {
        self.tracks[track.index()].settings.is_some()
    }

    pub fn sample_count(&self, track: Track) -> u64 {
        self.tracks[track.index()].samples
    }

    pub fn last_timestamp(&self, track: Track) -> Option<MediaTime> {
        self.tracks[track.index()].last_timestamp
    }

    /// Configure the encoder for `track`
    ///
    /// The output file is created on the first successful call.
    pub fn configure_track(&mut self, track: Track, settings: EncoderSettings) -> WriterResult<()> {
        if !matches!(self.status, WriterStatus::Idle | WriterStatus::Writing) {
            return Err(WriterError::NotAppending(self.status.as_str()));
        }
        if self.is_track_ready(track) {
            return Err(WriterError::TrackAlreadyConfigured(track));
        }
        settings.validate_for(track)?;

        let muxer = self
            .muxer
            .as_mut()
            .ok_or(WriterError::NotAppending("writer released"))?;

        if !self.opened {
            if let Some(parent) = self.partial.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            muxer.open(&self.partial)?;
            self.opened = true;
            tracing::info!(path = %self.partial.display(), "Opened output for writing");
        }

        muxer.add_track(&settings)?;
        tracing::info!(%track, ?settings, "Track ready");

        self.tracks[track.index()].settings = Some(settings);
        self.status = WriterStatus::Writing;
        Ok(())
    }

    /// Append one (already rebased) frame
    pub fn append(&mut self, frame: &Frame) -> WriterResult<()> {
        if self.status != WriterStatus::Writing {
            return Err(WriterError::NotAppending(self.status.as_str()));
        }
        let track = frame.track();
        let slot = &self.tracks[track.index()];
        if slot.settings.is_none() {
            return Err(WriterError::TrackNotReady(track));
        }

        let timestamp = frame.presentation_timestamp();
        if let Some(last) = slot.last_timestamp {
            if timestamp < last {
                return Err(WriterError::NonMonotonic {
                    track,
                    timestamp,
                    last,
                });
            }
        }

        let muxer = self
            .muxer
            .as_mut()
            .ok_or(WriterError::NotAppending("writer released"))?;
        if let Err(e) = muxer.write_sample(frame) {
            tracing::error!(%track, error = %e, "Failed to write sample");
            self.status = WriterStatus::Failed;
            return Err(e);
        }

        let slot = &mut self.tracks[track.index()];
        slot.last_timestamp = Some(timestamp);
        slot.samples += 1;
        Ok(())
    }

    /// Hand the output resource to a finalize job
    ///
    /// The job does the blocking flush; its result must be passed back to
    /// [`complete_finalize`](Self::complete_finalize).
    pub fn begin_finalize(&mut self) -> WriterResult<FinalizeJob> {
        if self.finalize_requested {
            return Err(WriterError::FinalizeAlreadyRequested);
        }
        if self.status != WriterStatus::Writing {
            return Err(WriterError::NotAppending(self.status.as_str()));
        }
        let muxer = self
            .muxer
            .take()
            .ok_or(WriterError::NotAppending("writer released"))?;

        self.finalize_requested = true;
        self.status = WriterStatus::Finalizing;
        tracing::info!(destination = %self.destination.display(), "Finalizing output");

        Ok(FinalizeJob {
            muxer,
            partial: self.partial.clone(),
            destination: self.destination.clone(),
            cancel_flag: Arc::clone(&self.cancel_flag),
            keep_incomplete: self.keep_incomplete,
            audio_samples: self.sample_count(Track::Audio),
            video_samples: self.sample_count(Track::Video),
        })
    }

    /// Record the result of a finalize job
    ///
    /// If the writer was aborted in the meantime, a late success is discarded
    /// and its output removed.
    pub fn complete_finalize(
        &mut self,
        result: WriterResult<OutputDescriptor>,
    ) -> WriterResult<OutputDescriptor> {
        if self.status == WriterStatus::Aborted {
            if result.is_ok() {
                tracing::info!("Discarding output finalized after abort");
            }
            remove_outputs(&[&self.destination, &self.partial]);
            return Err(WriterError::Aborted);
        }

        match result {
            Ok(descriptor) => {
                self.status = WriterStatus::Finished;
                self.result = Some(descriptor.clone());
                tracing::info!(
                    path = %descriptor.path.display(),
                    bytes = descriptor.bytes,
                    "Output finalized"
                );
                Ok(descriptor)
            }
            Err(e) => {
                self.status = WriterStatus::Failed;
                tracing::error!(error = %e, "Finalize failed");
                // An overwritten recording must not survive a failed replacement
                if self.keep_incomplete {
                    remove_outputs(&[&self.destination]);
                } else {
                    remove_outputs(&[&self.destination, &self.partial]);
                }
                Err(e)
            }
        }
    }

    /// Flush and close the container
    ///
    /// A second call after success returns the cached descriptor.
    pub async fn finalize(&mut self) -> WriterResult<OutputDescriptor> {
        if let Some(done) = &self.result {
            return Ok(done.clone());
        }
        let job = self.begin_finalize()?;
        let result = tokio::task::spawn_blocking(move || job.run())
            .await
            .unwrap_or_else(|e| Err(WriterError::Encoder(format!("finalize task failed: {}", e))));
        self.complete_finalize(result)
    }

    /// Discard everything and release the output resource
    pub fn abort(&mut self) -> AbortReport {
        self.cancel_flag.store(true, Ordering::SeqCst);
        self.muxer = None;
        self.status = WriterStatus::Aborted;
        self.result = None;

        let report = remove_outputs(&[&self.partial, &self.destination]);
        tracing::info!(
            removed = report.removed.len(),
            errors = report.errors.len(),
            "Writer aborted"
        );
        report
    }
}

/// Blocking part of finalize, run off the processing context
pub struct FinalizeJob {
    muxer: Box<dyn ContainerMuxer>,
    partial: PathBuf,
    destination: PathBuf,
    cancel_flag: Arc<AtomicBool>,
    keep_incomplete: bool,
    audio_samples: u64,
    video_samples: u64,
}

impl FinalizeJob {
    pub fn run(mut self) -> WriterResult<OutputDescriptor> {
        let result = self.muxer.finish().and_then(|bytes| {
            if self.cancel_flag.load(Ordering::SeqCst) {
                return Err(WriterError::Aborted);
            }
            fs::rename(&self.partial, &self.destination)?;
            Ok(bytes)
        });

        match result {
            Ok(bytes) => Ok(OutputDescriptor {
                path: self.destination,
                bytes,
                audio_samples: self.audio_samples,
                video_samples: self.video_samples,
            }),
            Err(e) => {
                if self.cancel_flag.load(Ordering::SeqCst) || !self.keep_incomplete {
                    remove_outputs(&[&self.partial]);
                } else {
                    tracing::warn!(path = %self.partial.display(), "Keeping incomplete output");
                }
                Err(e)
            }
        }
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

fn remove_outputs(paths: &[&Path]) -> AbortReport {
    let mut report = AbortReport::default();
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => report.removed.push(path.to_path_buf()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove output");
                report.errors.push(format!("{}: {}", path.display(), e));
            }
        }
    }
    report
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::geometry::{Dimensions, OutputGeometry};
    use crate::config::{CaptureConfig, OutputFormat};
    use crate::writer::muxer::{read_index, TimedContainerMuxer};
    use tempfile::tempdir;

    /// Muxer that fails on demand
    #[derive(Default)]
    pub(crate) struct FailingMuxer {
        pub fail_open: bool,
        pub fail_write: bool,
        pub fail_finish: bool,
    }

    impl ContainerMuxer for FailingMuxer {
        fn open(&mut self, path: &Path) -> WriterResult<()> {
            if self.fail_open {
                return Err(WriterError::Encoder("open refused".into()));
            }
            fs::write(path, b"partial")?;
            Ok(())
        }

        fn add_track(&mut self, _settings: &EncoderSettings) -> WriterResult<()> {
            Ok(())
        }

        fn write_sample(&mut self, _frame: &Frame) -> WriterResult<()> {
            if self.fail_write {
                return Err(WriterError::DiskFull);
            }
            Ok(())
        }

        fn finish(&mut self) -> WriterResult<u64> {
            if self.fail_finish {
                return Err(WriterError::DiskFull);
            }
            Ok(7)
        }

        fn file_extension(&self) -> &'static str {
            "tsc"
        }
    }

    pub(crate) fn test_geometry() -> OutputGeometry {
        OutputGeometry::compute(OutputFormat::Preset, Dimensions::new(640, 480))
    }

    pub(crate) fn video_settings() -> EncoderSettings {
        EncoderSettings::video_from_config(&CaptureConfig::video(), &test_geometry())
    }

    pub(crate) fn audio_settings() -> EncoderSettings {
        EncoderSettings::audio_from_config(&CaptureConfig::video())
    }

    fn video_frame(ms: i64) -> Frame {
        Frame::new(
            Track::Video,
            MediaTime::from_millis(ms),
            MediaTime::new(1, 30),
            Arc::from(vec![0u8; 8]),
            ms as u64,
        )
    }

    #[test]
    fn test_configure_twice_rejected() {
        let dir = tempdir().unwrap();
        let mut writer =
            StreamWriter::new(dir.path().join("out.tsc"), Box::new(TimedContainerMuxer::new()));

        writer.configure_track(Track::Video, video_settings()).unwrap();
        assert!(matches!(
            writer.configure_track(Track::Video, video_settings()),
            Err(WriterError::TrackAlreadyConfigured(Track::Video))
        ));
        assert!(writer.is_track_ready(Track::Video));
        assert!(!writer.is_track_ready(Track::Audio));
    }

    #[test]
    fn test_append_requires_ready_track() {
        let dir = tempdir().unwrap();
        let mut writer =
            StreamWriter::new(dir.path().join("out.tsc"), Box::new(TimedContainerMuxer::new()));

        assert!(matches!(
            writer.append(&video_frame(0)),
            Err(WriterError::NotAppending(_))
        ));

        writer.configure_track(Track::Audio, audio_settings()).unwrap();
        assert!(matches!(
            writer.append(&video_frame(0)),
            Err(WriterError::TrackNotReady(Track::Video))
        ));
    }

    #[test]
    fn test_append_rejects_backwards_timestamp() {
        let dir = tempdir().unwrap();
        let mut writer =
            StreamWriter::new(dir.path().join("out.tsc"), Box::new(TimedContainerMuxer::new()));
        writer.configure_track(Track::Video, video_settings()).unwrap();

        writer.append(&video_frame(33)).unwrap();
        writer.append(&video_frame(33)).unwrap();
        assert!(matches!(
            writer.append(&video_frame(0)),
            Err(WriterError::NonMonotonic { .. })
        ));
        assert_eq!(writer.sample_count(Track::Video), 2);
    }

    #[tokio::test]
    async fn test_finalize_moves_partial_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("out.tsc");
        let mut writer = StreamWriter::new(destination.clone(), Box::new(TimedContainerMuxer::new()));
        writer.configure_track(Track::Video, video_settings()).unwrap();
        for i in 0..3 {
            writer.append(&video_frame(i * 33)).unwrap();
        }
        assert!(writer.partial_path().exists());

        let first = writer.finalize().await.unwrap();
        assert_eq!(first.path, destination);
        assert_eq!(first.video_samples, 3);
        assert!(destination.exists());
        assert!(!writer.partial_path().exists());
        assert_eq!(read_index(&destination).unwrap().tracks.len(), 1);

        let second = writer.finalize().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(writer.status(), WriterStatus::Finished);
    }

    #[tokio::test]
    async fn test_finalize_failure_removes_partial() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("out.tsc");
        let muxer = FailingMuxer {
            fail_finish: true,
            ..Default::default()
        };
        let mut writer = StreamWriter::new(destination.clone(), Box::new(muxer));
        writer.configure_track(Track::Video, video_settings()).unwrap();
        writer.append(&video_frame(0)).unwrap();

        assert!(matches!(writer.finalize().await, Err(WriterError::DiskFull)));
        assert_eq!(writer.status(), WriterStatus::Failed);
        assert!(!destination.exists());
        assert!(!writer.partial_path().exists());

        assert!(matches!(
            writer.finalize().await,
            Err(WriterError::FinalizeAlreadyRequested)
        ));
    }

    #[tokio::test]
    async fn test_finalize_failure_removes_overwritten_destination() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("out.tsc");
        fs::write(&destination, b"stale recording").unwrap();

        let muxer = FailingMuxer {
            fail_finish: true,
            ..Default::default()
        };
        let mut writer = StreamWriter::new(destination.clone(), Box::new(muxer));
        writer.configure_track(Track::Video, video_settings()).unwrap();
        writer.append(&video_frame(0)).unwrap();

        assert!(writer.finalize().await.is_err());
        assert!(!destination.exists());
        assert!(!writer.partial_path().exists());
    }

    #[tokio::test]
    async fn test_finalize_failure_can_keep_incomplete_output() {
        let dir = tempdir().unwrap();
        let muxer = FailingMuxer {
            fail_finish: true,
            ..Default::default()
        };
        let mut writer =
            StreamWriter::new(dir.path().join("out.tsc"), Box::new(muxer)).keep_incomplete_output(true);
        writer.configure_track(Track::Video, video_settings()).unwrap();

        assert!(writer.finalize().await.is_err());
        assert!(writer.partial_path().exists());
        assert!(!writer.destination().exists());
    }

    #[test]
    fn test_abort_removes_partial() {
        let dir = tempdir().unwrap();
        let mut writer =
            StreamWriter::new(dir.path().join("out.tsc"), Box::new(TimedContainerMuxer::new()));
        writer.configure_track(Track::Video, video_settings()).unwrap();
        writer.append(&video_frame(0)).unwrap();

        let report = writer.abort();
        assert_eq!(report.removed, vec![writer.partial_path().to_path_buf()]);
        assert!(report.errors.is_empty());
        assert!(!writer.partial_path().exists());
        assert!(matches!(
            writer.append(&video_frame(33)),
            Err(WriterError::NotAppending("aborted"))
        ));
    }

    #[test]
    fn test_late_finalize_after_abort_is_discarded() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("out.tsc");
        let mut writer = StreamWriter::new(destination.clone(), Box::new(TimedContainerMuxer::new()));
        writer.configure_track(Track::Video, video_settings()).unwrap();
        writer.append(&video_frame(0)).unwrap();

        let job = writer.begin_finalize().unwrap();
        writer.abort();
        let result = job.run();
        assert!(matches!(result, Err(WriterError::Aborted)));

        assert!(matches!(
            writer.complete_finalize(result),
            Err(WriterError::Aborted)
        ));
        assert!(!destination.exists());
        assert!(!writer.partial_path().exists());
    }

    #[test]
    fn test_write_failure_marks_writer_failed() {
        let dir = tempdir().unwrap();
        let muxer = FailingMuxer {
            fail_write: true,
            ..Default::default()
        };
        let mut writer = StreamWriter::new(dir.path().join("out.tsc"), Box::new(muxer));
        writer.configure_track(Track::Video, video_settings()).unwrap();

        assert!(matches!(writer.append(&video_frame(0)), Err(WriterError::DiskFull)));
        assert_eq!(writer.status(), WriterStatus::Failed);
    }
}
