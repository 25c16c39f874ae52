//! Frame source adapter
//!
//! Hardware callbacks hand raw buffers to a [`FrameFeed`]. The feed wraps each
//! buffer into a [`Frame`] and queues it for the processing context without
//! ever blocking: when the per-track queue is full the frame is dropped.

use crate::capture::frame::{Frame, Track};
use crate::capture::geometry::OutputGeometry;
use crate::utils::time::MediaTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Interleaved PCM layout of delivered audio buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    /// Samples per second per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bytes per sample per channel
    pub bytes_per_sample: u16,
}

impl AudioFormat {
    /// Sample frames (one sample per channel) contained in `bytes`
    pub fn sample_frames(&self, bytes: usize) -> u64 {
        let frame_size = self.channels as usize * self.bytes_per_sample as usize;
        if frame_size == 0 {
            return 0;
        }
        (bytes / frame_size) as u64
    }

    pub fn duration_of(&self, bytes: usize) -> MediaTime {
        MediaTime::new(self.sample_frames(bytes) as i64, self.sample_rate)
    }
}

#[derive(Debug, Clone, Copy)]
struct SourceFormat {
    frame_rate: u32,
    audio: AudioFormat,
}

struct SourceInner {
    format: RwLock<SourceFormat>,
    geometry: RwLock<Option<OutputGeometry>>,
    sequence: AtomicU64,
}

/// Normalizes raw buffers into frames
///
/// Cheap to clone; all clones share the arrival counter, so sequence hints
/// are ordered across both tracks.
#[derive(Clone)]
pub struct FrameSource {
    inner: Arc<SourceInner>,
}

impl FrameSource {
    pub fn new(frame_rate: u32, audio: AudioFormat) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                format: RwLock::new(SourceFormat { frame_rate, audio }),
                geometry: RwLock::new(None),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Build a frame for `data` captured at `timestamp`
    ///
    /// Video frames last one frame interval; audio frames last as long as the
    /// samples they carry.
    pub fn on_frame(&self, data: impl Into<Arc<[u8]>>, track: Track, timestamp: MediaTime) -> Frame {
        let payload = data.into();
        let format = *self.inner.format.read();
        let duration = match track {
            Track::Video => MediaTime::new(1, format.frame_rate),
            Track::Audio => format.audio.duration_of(payload.len()),
        };
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        Frame::new(track, timestamp, duration, payload, sequence)
    }

    pub fn set_frame_rate(&self, frame_rate: u32) {
        self.inner.format.write().frame_rate = frame_rate.max(1);
    }

    pub fn set_audio_format(&self, audio: AudioFormat) {
        self.inner.format.write().audio = audio;
    }

    pub fn frame_rate(&self) -> u32 {
        self.inner.format.read().frame_rate
    }

    pub fn audio_format(&self) -> AudioFormat {
        self.inner.format.read().audio
    }

    /// Crop/scale hint for the preview renderer
    pub fn set_output_geometry(&self, geometry: OutputGeometry) {
        *self.inner.geometry.write() = Some(geometry);
    }

    pub fn output_geometry(&self) -> Option<OutputGeometry> {
        *self.inner.geometry.read()
    }
}

/// Non-blocking entry point for one track's hardware callback
#[derive(Clone)]
pub struct FrameFeed {
    track: Track,
    source: FrameSource,
    tx: mpsc::Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

impl FrameFeed {
    /// Create a feed and the receiving end of its bounded queue
    pub fn channel(track: Track, source: FrameSource, depth: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let feed = Self {
            track,
            source,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (feed, rx)
    }

    pub fn track(&self) -> Track {
        self.track
    }

    /// Queue a captured buffer
    ///
    /// Returns `false` if the frame was dropped because the queue is full or
    /// the processing context has shut down.
    pub fn push(&self, data: impl Into<Arc<[u8]>>, timestamp: MediaTime) -> bool {
        let frame = self.source.on_frame(data, self.track, timestamp);
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    track = %self.track,
                    sequence = frame.sequence(),
                    "Frame queue full, dropping frame"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Frames dropped because the queue was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> FrameSource {
        FrameSource::new(
            30,
            AudioFormat {
                sample_rate: 44_100,
                channels: 2,
                bytes_per_sample: 2,
            },
        )
    }

    #[test]
    fn test_video_duration_from_frame_rate() {
        let frame = source().on_frame(vec![0u8; 16], Track::Video, MediaTime::from_millis(33));
        assert_eq!(frame.duration(), MediaTime::new(1, 30));
        assert_eq!(frame.presentation_timestamp(), MediaTime::from_millis(33));
    }

    #[test]
    fn test_audio_duration_from_sample_count() {
        // 1024 stereo 16-bit sample frames
        let frame = source().on_frame(vec![0u8; 4096], Track::Audio, MediaTime::ZERO);
        assert_eq!(frame.duration(), MediaTime::new(1024, 44_100));
    }

    #[test]
    fn test_sequence_is_shared_across_clones() {
        let a = source();
        let b = a.clone();
        let first = a.on_frame(vec![0u8], Track::Video, MediaTime::ZERO);
        let second = b.on_frame(vec![0u8; 4], Track::Audio, MediaTime::ZERO);
        assert!(second.sequence() > first.sequence());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (feed, mut rx) = FrameFeed::channel(Track::Video, source(), 2);
        assert!(feed.push(vec![1u8], MediaTime::from_millis(0)));
        assert!(feed.push(vec![2u8], MediaTime::from_millis(33)));
        assert!(!feed.push(vec![3u8], MediaTime::from_millis(66)));
        assert_eq!(feed.dropped_frames(), 1);

        assert_eq!(rx.try_recv().unwrap().payload(), &[1u8]);
        assert_eq!(rx.try_recv().unwrap().payload(), &[2u8]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_queue_reports_drop() {
        let (feed, rx) = FrameFeed::channel(Track::Audio, source(), 4);
        drop(rx);
        assert!(!feed.push(vec![0u8; 4], MediaTime::ZERO));
        assert_eq!(feed.dropped_frames(), 0);
    }
}
