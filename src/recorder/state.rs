//! Recording state management
//!
//! Defines the recording state machine states and the session aggregate.

use crate::capture::frame::Track;
use crate::config::CaptureConfig;
use crate::utils::error::{CaptureError, CaptureResult};
use crate::utils::time::MediaTime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    /// Created, not started
    #[default]
    Idle,
    /// Waiting for every required track to become ready
    Starting,
    /// Frames are rebased and written
    Recording,
    /// Writer stays open, frames are dropped
    Paused,
    /// Finalize in flight
    Stopping,
    /// Output finalized at the destination
    Ended,
    /// Aborted on request; no output remains
    Cancelled,
    /// Unrecoverable error; no output remains
    Failed,
}

impl CaptureState {
    /// Ended, Cancelled and Failed are absorbing
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CaptureState::Ended | CaptureState::Cancelled | CaptureState::Failed
        )
    }

    /// A session in this state blocks the creation of another one
    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != CaptureState::Idle
    }

    pub fn can_transition_to(self, next: CaptureState) -> bool {
        use CaptureState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Recording)
                | (Starting, Cancelled)
                | (Starting, Failed)
                | (Recording, Paused)
                | (Recording, Stopping)
                | (Recording, Cancelled)
                | (Paused, Recording)
                | (Paused, Stopping)
                | (Paused, Cancelled)
                | (Stopping, Ended)
                | (Stopping, Failed)
                | (Stopping, Cancelled)
        )
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Starting => "starting",
            CaptureState::Recording => "recording",
            CaptureState::Paused => "paused",
            CaptureState::Stopping => "stopping",
            CaptureState::Ended => "ended",
            CaptureState::Cancelled => "cancelled",
            CaptureState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Per-track progress inside a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackState {
    /// Encoder settings accepted by the writer
    pub ready: bool,
    /// Output timestamp of the last appended frame
    pub last_written_timestamp: Option<MediaTime>,
    /// Total pause gap removed from this track's timestamps
    pub offset: MediaTime,
}

/// Which tracks a session records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredTracks {
    /// Microphone enabled, available and permitted at start
    pub audio: bool,
    /// Always set for video capture
    pub video: bool,
}

impl RequiredTracks {
    pub fn contains(&self, track: Track) -> bool {
        match track {
            Track::Audio => self.audio,
            Track::Video => self.video,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Track> + '_ {
        Track::ALL.into_iter().filter(|t| self.contains(*t))
    }
}

/// One recording, from start request to a terminal state
#[derive(Debug, Clone)]
pub struct RecordingSession {
    /// Unique per recording
    pub id: Uuid,
    state: CaptureState,
    /// Wall clock time of the start request
    pub start_wall_clock: DateTime<Utc>,
    /// Final output path
    pub destination: PathBuf,
    /// Configuration frozen at start
    pub config: CaptureConfig,
    /// Tracks that must be ready before Recording
    pub required: RequiredTracks,
    tracks: [TrackState; 2],
    accumulated: [MediaTime; 2],
    /// Durations written while Starting, folded in on entering Recording
    pending: [MediaTime; 2],
}

impl RecordingSession {
    pub fn new(destination: PathBuf, config: CaptureConfig, required: RequiredTracks) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: CaptureState::Idle,
            start_wall_clock: Utc::now(),
            destination,
            config,
            required,
            tracks: [TrackState::default(); 2],
            accumulated: [MediaTime::ZERO; 2],
            pending: [MediaTime::ZERO; 2],
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Move to `next`, failing if the transition table does not allow it
    pub fn transition(&mut self, next: CaptureState, action: &'static str) -> CaptureResult<CaptureState> {
        let previous = self.state;
        if !previous.can_transition_to(next) {
            return Err(CaptureError::InvalidTransition {
                state: previous,
                action,
            });
        }
        if next == CaptureState::Starting {
            self.start_wall_clock = Utc::now();
        }
        if previous == CaptureState::Starting && next == CaptureState::Recording {
            for track in Track::ALL {
                let pending = std::mem::take(&mut self.pending[track.index()]);
                self.accumulated[track.index()] += pending;
            }
        }
        self.state = next;
        tracing::debug!(session = %self.id, from = %previous, to = %next, "Session transition");
        Ok(previous)
    }

    pub fn track(&self, track: Track) -> &TrackState {
        &self.tracks[track.index()]
    }

    pub(crate) fn track_mut(&mut self, track: Track) -> &mut TrackState {
        &mut self.tracks[track.index()]
    }

    /// Every required track has accepted encoder settings
    pub fn all_required_ready(&self) -> bool {
        self.required.iter().all(|t| self.track(t).ready)
    }

    /// Every required track has had a frame written
    pub fn all_required_written(&self) -> bool {
        self.required
            .iter()
            .all(|t| self.track(t).last_written_timestamp.is_some())
    }

    /// Count a written frame's duration
    ///
    /// Durations only grow while Recording; frames written during Starting
    /// are held back until the session enters Recording.
    pub fn accumulate(&mut self, track: Track, duration: MediaTime) {
        match self.state {
            CaptureState::Recording => self.accumulated[track.index()] += duration,
            CaptureState::Starting => self.pending[track.index()] += duration,
            _ => {}
        }
    }

    pub fn accumulated(&self, track: Track) -> MediaTime {
        self.accumulated[track.index()]
    }

    pub fn captured_audio_seconds(&self) -> f64 {
        self.accumulated(Track::Audio).seconds()
    }

    pub fn captured_video_seconds(&self) -> f64 {
        self.accumulated(Track::Video).seconds()
    }
}

/// Read-only view of the current session, shared with accessors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// None until the first recording starts
    pub session_id: Option<Uuid>,
    /// State of the latest session
    pub state: CaptureState,
    /// Audio written while recording, in seconds
    pub captured_audio_seconds: f64,
    /// Video written while recording, in seconds
    pub captured_video_seconds: f64,
    /// Output path of the latest session
    pub destination: Option<PathBuf>,
}

impl From<&RecordingSession> for SessionSnapshot {
    fn from(session: &RecordingSession) -> Self {
        Self {
            session_id: Some(session.id),
            state: session.state(),
            captured_audio_seconds: session.captured_audio_seconds(),
            captured_video_seconds: session.captured_video_seconds(),
            destination: Some(session.destination.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> RecordingSession {
        RecordingSession::new(
            PathBuf::from("/tmp/out.tsc"),
            CaptureConfig::video(),
            RequiredTracks {
                audio: true,
                video: true,
            },
        )
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for terminal in [CaptureState::Ended, CaptureState::Cancelled, CaptureState::Failed] {
            for next in [
                CaptureState::Idle,
                CaptureState::Starting,
                CaptureState::Recording,
                CaptureState::Stopping,
                CaptureState::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut session = session();
        let err = session.transition(CaptureState::Paused, "pause").unwrap_err();
        assert!(matches!(
            err,
            CaptureError::InvalidTransition {
                state: CaptureState::Idle,
                action: "pause"
            }
        ));
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[test]
    fn test_durations_only_grow_while_recording() {
        let mut session = session();
        session.accumulate(Track::Video, MediaTime::new(1, 30));
        assert_eq!(session.accumulated(Track::Video), MediaTime::ZERO);

        session.transition(CaptureState::Starting, "start").unwrap();
        session.accumulate(Track::Video, MediaTime::new(1, 30));
        assert_eq!(session.accumulated(Track::Video), MediaTime::ZERO);

        session.transition(CaptureState::Recording, "record").unwrap();
        assert_eq!(session.accumulated(Track::Video), MediaTime::new(1, 30));

        session.accumulate(Track::Video, MediaTime::new(1, 30));
        session.transition(CaptureState::Paused, "pause").unwrap();
        session.accumulate(Track::Video, MediaTime::new(1, 30));
        assert_eq!(session.accumulated(Track::Video), MediaTime::new(2, 30));
    }

    #[test]
    fn test_required_tracks() {
        let required = RequiredTracks {
            audio: false,
            video: true,
        };
        assert_eq!(required.iter().collect::<Vec<_>>(), vec![Track::Video]);
    }
}
