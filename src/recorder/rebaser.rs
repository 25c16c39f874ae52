//! Timestamp rebaser
//!
//! Keeps the output timeline continuous across pause/resume. Each track
//! carries its own offset: on the first frame after a resume the gap between
//! that frame and the track's last accepted frame is added to the offset,
//! and every frame is written at `source timestamp - offset`.

use crate::capture::frame::{Frame, Track};
use crate::config::ResumeAlignment;
use crate::utils::time::MediaTime;
use thiserror::Error;

/// Why a frame was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RebaseRejection {
    /// Adjusted timestamp does not move past the last written one
    #[error("{track} frame at {adjusted} is not after {last}")]
    NotAfterLast {
        track: Track,
        adjusted: MediaTime,
        last: MediaTime,
    },
    /// First frame after a resume is older than the last frame before the pause
    #[error("{track} frame at {timestamp} predates the pause point {anchor}")]
    BeforeResumeAnchor {
        track: Track,
        timestamp: MediaTime,
        anchor: MediaTime,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrackTimeline {
    offset: MediaTime,
    last_written: Option<MediaTime>,
    last_source: Option<MediaTime>,
    last_duration: MediaTime,
    resume_pending: bool,
}

impl TrackTimeline {
    pub fn offset(&self) -> MediaTime {
        self.offset
    }

    pub fn last_written(&self) -> Option<MediaTime> {
        self.last_written
    }

    /// Source timestamp of the last accepted frame
    pub fn last_source(&self) -> Option<MediaTime> {
        self.last_source
    }

    pub fn resume_pending(&self) -> bool {
        self.resume_pending
    }
}

/// Per-session rebaser for both tracks
#[derive(Debug, Clone)]
pub struct TimestampRebaser {
    alignment: ResumeAlignment,
    tracks: [TrackTimeline; 2],
    session_start: Option<MediaTime>,
}

impl TimestampRebaser {
    pub fn new(alignment: ResumeAlignment) -> Self {
        Self {
            alignment,
            tracks: [TrackTimeline::default(); 2],
            session_start: None,
        }
    }

    pub fn track(&self, track: Track) -> &TrackTimeline {
        &self.tracks[track.index()]
    }

    /// Source timestamp of the first frame accepted in the session
    pub fn session_start(&self) -> Option<MediaTime> {
        self.session_start
    }

    /// Called on Paused -> Recording
    ///
    /// The new gap is measured per track on that track's next frame.
    pub fn mark_resume(&mut self) {
        for timeline in &mut self.tracks {
            timeline.resume_pending = true;
        }
    }

    /// Produce the rebased copy of `frame`, or reject it
    pub fn rebase(&mut self, frame: &Frame) -> Result<Frame, RebaseRejection> {
        let track = frame.track();
        let source = frame.presentation_timestamp();
        let alignment = self.alignment;
        let session_start = self.session_start;
        let timeline = &mut self.tracks[track.index()];

        let mut offset = timeline.offset;
        let mut anchored = false;
        if timeline.resume_pending {
            let gap = match timeline.last_source {
                Some(anchor) => {
                    if source < anchor {
                        return Err(RebaseRejection::BeforeResumeAnchor {
                            track,
                            timestamp: source,
                            anchor,
                        });
                    }
                    let gap = source - anchor;
                    match alignment {
                        ResumeAlignment::AnchorToLastFrame => {
                            anchored = true;
                            gap
                        }
                        ResumeAlignment::ContinueAfterLastFrame => {
                            MediaTime::ZERO.max(gap - timeline.last_duration)
                        }
                    }
                }
                // Nothing written before the pause: measure from session start
                None => match session_start {
                    Some(start) if source > start => source - start,
                    _ => MediaTime::ZERO,
                },
            };
            offset += gap;
        }

        let adjusted = source - offset;
        if let Some(last) = timeline.last_written {
            let accepted = if anchored { adjusted >= last } else { adjusted > last };
            if !accepted {
                return Err(RebaseRejection::NotAfterLast {
                    track,
                    adjusted,
                    last,
                });
            }
        }

        if timeline.resume_pending {
            tracing::debug!(
                %track,
                gap = %(offset - timeline.offset),
                offset = %offset,
                "Rebased track after resume"
            );
        }
        timeline.offset = offset;
        timeline.resume_pending = false;
        timeline.last_written = Some(adjusted);
        timeline.last_source = Some(source);
        timeline.last_duration = frame.duration();
        if self.session_start.is_none() {
            self.session_start = Some(source);
        }

        Ok(frame.retimed(adjusted))
    }
}
