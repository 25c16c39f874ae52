//! Captured frame records
//!
//! A [`Frame`] is the normalized form of one hardware sample buffer. Frames
//! are never edited in place; rebasing produces a copy with a new timestamp.

use crate::utils::time::MediaTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The two media tracks of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    /// Microphone PCM
    Audio,
    /// Camera frames
    Video,
}

impl Track {
    pub const ALL: [Track; 2] = [Track::Audio, Track::Video];

    /// Stable index for per-track arrays
    pub fn index(self) -> usize {
        match self {
            Track::Audio => 0,
            Track::Video => 1,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            Track::Audio => b'a',
            Track::Video => b'v',
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Track> {
        match tag {
            b'a' => Some(Track::Audio),
            b'v' => Some(Track::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Track::Audio => write!(f, "audio"),
            Track::Video => write!(f, "video"),
        }
    }
}

/// One timestamped sample buffer
#[derive(Debug, Clone)]
pub struct Frame {
    track: Track,
    presentation_timestamp: MediaTime,
    duration: MediaTime,
    payload: Arc<[u8]>,
    sequence: u64,
}

impl Frame {
    pub fn new(
        track: Track,
        presentation_timestamp: MediaTime,
        duration: MediaTime,
        payload: Arc<[u8]>,
        sequence: u64,
    ) -> Self {
        Self {
            track,
            presentation_timestamp,
            duration,
            payload,
            sequence,
        }
    }

    pub fn track(&self) -> Track {
        self.track
    }

    pub fn presentation_timestamp(&self) -> MediaTime {
        self.presentation_timestamp
    }

    pub fn duration(&self) -> MediaTime {
        self.duration
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Shared handle to the payload
    pub fn payload_arc(&self) -> Arc<[u8]> {
        Arc::clone(&self.payload)
    }

    /// Monotonic arrival order across both tracks
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// End of this frame on its own timeline
    pub fn end_timestamp(&self) -> MediaTime {
        self.presentation_timestamp + self.duration
    }

    /// Copy of this frame presented at `timestamp`; the payload is shared
    pub fn retimed(&self, timestamp: MediaTime) -> Frame {
        Frame {
            presentation_timestamp: timestamp,
            payload: Arc::clone(&self.payload),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retimed_shares_payload() {
        let frame = Frame::new(
            Track::Video,
            MediaTime::from_millis(532),
            MediaTime::new(1, 30),
            Arc::from(vec![1u8, 2, 3]),
            7,
        );
        let moved = frame.retimed(MediaTime::from_millis(132));

        assert_eq!(moved.presentation_timestamp(), MediaTime::from_millis(132));
        assert_eq!(frame.presentation_timestamp(), MediaTime::from_millis(532));
        assert_eq!(moved.sequence(), 7);
        assert!(Arc::ptr_eq(&moved.payload_arc(), &frame.payload_arc()));
    }

    #[test]
    fn test_track_tags() {
        for track in Track::ALL {
            assert_eq!(Track::from_tag(track.tag()), Some(track));
        }
        assert_eq!(Track::from_tag(b'x'), None);
    }
}
