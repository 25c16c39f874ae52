//! Capture state machine
//!
//! Owns one recording's lifecycle. Incoming frames are gated on the session
//! state, rebased, and appended to the writer; lifecycle requests move the
//! session through [`CaptureState`]. Everything here runs on the processing
//! context, so no method blocks except where a writer operation does.

use crate::capture::frame::{Frame, Track};
use crate::capture::geometry::OutputGeometry;
use crate::recorder::events::{CaptureOutcome, EventSender, VideoResult, VisionEvent};
use crate::recorder::rebaser::{RebaseRejection, TimestampRebaser};
use crate::recorder::state::{CaptureState, RecordingSession};
use crate::utils::error::{CaptureError, CaptureFailure, CaptureResult, WriterResult};
use crate::writer::settings::EncoderSettings;
use crate::writer::stream::{FinalizeJob, OutputDescriptor, StreamWriter};

/// What caused a session to enter Stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Caller asked to end the capture
    Requested,
    /// The governing track reached the configured limit
    MaximumDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Session is not accepting frames in this state
    Gated(CaptureState),
    /// Track is not recorded in this session
    TrackDisabled,
    /// Waiting for the other required track's encoder
    AwaitingTracks,
    /// Duplicate or out-of-order timestamp
    Rejected(RebaseRejection),
}

/// Outcome of offering a frame to the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Appended to the writer
    Written,
    /// Discarded without affecting the session
    Dropped(DropReason),
    /// The frame hit an unrecoverable writer error; the session failed
    Failed,
}

pub struct CaptureStateMachine {
    session: RecordingSession,
    rebaser: TimestampRebaser,
    writer: StreamWriter,
    events: EventSender,
    video_geometry: OutputGeometry,
    governing: Track,
    thumbnail: Option<Vec<u8>>,
    stop_reason: Option<StopReason>,
    finalize_pending: bool,
    paused_by_interruption: bool,
    gated_drops: u64,
    outcome: Option<CaptureOutcome>,
    reported: bool,
}

impl CaptureStateMachine {
    /// Take an idle session into Starting
    pub fn begin(
        mut session: RecordingSession,
        writer: StreamWriter,
        events: EventSender,
        video_geometry: OutputGeometry,
    ) -> CaptureResult<Self> {
        session.transition(CaptureState::Starting, "start")?;

        let preferred = session.config.governing_track();
        let governing = if session.required.contains(preferred) {
            preferred
        } else {
            Track::Audio
        };

        tracing::info!(
            session = %session.id,
            destination = %session.destination.display(),
            audio = session.required.audio,
            video = session.required.video,
            "Starting video capture"
        );
        events.emit(VisionEvent::DidStartVideoCapture {
            session_id: session.id,
        });

        Ok(Self {
            rebaser: TimestampRebaser::new(session.config.resume_alignment),
            session,
            writer,
            events,
            video_geometry,
            governing,
            thumbnail: None,
            stop_reason: None,
            finalize_pending: false,
            paused_by_interruption: false,
            gated_drops: 0,
            outcome: None,
            reported: false,
        })
    }

    pub fn state(&self) -> CaptureState {
        self.session.state()
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    pub fn rebaser(&self) -> &TimestampRebaser {
        &self.rebaser
    }

    pub fn writer(&self) -> &StreamWriter {
        &self.writer
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Frames dropped by the state gate
    pub fn gated_drops(&self) -> u64 {
        self.gated_drops
    }

    /// Gate, rebase and write one frame
    pub fn handle_frame(&mut self, frame: &Frame) -> FrameDisposition {
        let state = self.session.state();
        if !matches!(state, CaptureState::Starting | CaptureState::Recording) {
            self.gated_drops += 1;
            tracing::trace!(track = %frame.track(), %state, "Dropping frame");
            return FrameDisposition::Dropped(DropReason::Gated(state));
        }

        let track = frame.track();
        if !self.session.required.contains(track) {
            return FrameDisposition::Dropped(DropReason::TrackDisabled);
        }

        if !self.session.track(track).ready {
            if let Err(e) = self.configure(track) {
                self.fail(e.into());
                return FrameDisposition::Failed;
            }
        }
        if !self.session.all_required_ready() {
            self.gated_drops += 1;
            tracing::debug!(%track, "Dropping frame until every track is ready");
            return FrameDisposition::Dropped(DropReason::AwaitingTracks);
        }

        let rebased = match self.rebaser.rebase(frame) {
            Ok(rebased) => rebased,
            Err(rejection) => {
                tracing::debug!(%rejection, "Frame rejected");
                return FrameDisposition::Dropped(DropReason::Rejected(rejection));
            }
        };

        if let Err(e) = self.writer.append(&rebased) {
            self.fail(e.into());
            return FrameDisposition::Failed;
        }

        let timeline = *self.rebaser.track(track);
        let track_state = self.session.track_mut(track);
        track_state.last_written_timestamp = timeline.last_written();
        track_state.offset = timeline.offset();
        self.session.accumulate(track, rebased.duration());

        if track == Track::Video && self.session.config.thumbnail_enabled && self.thumbnail.is_none() {
            self.thumbnail = Some(rebased.payload().to_vec());
        }

        let timestamp = rebased.presentation_timestamp();
        self.events.emit(match track {
            Track::Audio => VisionEvent::DidCaptureAudioSample {
                timestamp,
                captured_seconds: self.session.captured_audio_seconds(),
            },
            Track::Video => VisionEvent::DidCaptureVideoSample {
                timestamp,
                captured_seconds: self.session.captured_video_seconds(),
            },
        });

        if state == CaptureState::Starting && self.session.all_required_written() {
            if let Err(e) = self.session.transition(CaptureState::Recording, "record") {
                tracing::error!(error = %e, "Failed to enter recording");
            } else {
                tracing::info!(session = %self.session.id, "Recording");
            }
        }

        self.check_maximum_duration();
        FrameDisposition::Written
    }

    fn configure(&mut self, track: Track) -> WriterResult<()> {
        let settings = match track {
            Track::Video => EncoderSettings::video_from_config(&self.session.config, &self.video_geometry),
            Track::Audio => EncoderSettings::audio_from_config(&self.session.config),
        };
        self.writer.configure_track(track, settings)?;
        self.session.track_mut(track).ready = true;
        Ok(())
    }

    fn check_maximum_duration(&mut self) {
        let Some(maximum) = self.session.config.maximum_capture_duration else {
            return;
        };
        if self.session.state() != CaptureState::Recording {
            return;
        }
        let captured = self.session.accumulated(self.governing);
        if captured >= maximum {
            tracing::info!(%captured, %maximum, "Maximum capture duration reached");
            if let Err(e) = self.request_stop(StopReason::MaximumDuration) {
                tracing::error!(error = %e, "Failed to stop at maximum duration");
            }
        }
    }

    pub fn pause(&mut self) -> CaptureResult<()> {
        self.session.transition(CaptureState::Paused, "pause")?;
        self.paused_by_interruption = false;
        tracing::info!(session = %self.session.id, "Paused video capture");
        self.events.emit(VisionEvent::DidPauseVideoCapture {
            session_id: self.session.id,
        });
        Ok(())
    }

    pub fn resume(&mut self) -> CaptureResult<()> {
        self.session.transition(CaptureState::Recording, "resume")?;
        self.rebaser.mark_resume();
        self.paused_by_interruption = false;
        tracing::info!(session = %self.session.id, "Resumed video capture");
        self.events.emit(VisionEvent::DidResumeVideoCapture {
            session_id: self.session.id,
        });
        Ok(())
    }

    /// Recoverable interruption: pause if recording
    pub fn interrupt(&mut self) {
        if self.session.state() == CaptureState::Recording && self.pause().is_ok() {
            self.paused_by_interruption = true;
        }
    }

    /// Resume only if the interruption caused the pause
    pub fn interruption_ended(&mut self) {
        if self.paused_by_interruption && self.session.state() == CaptureState::Paused {
            if let Err(e) = self.resume() {
                tracing::warn!(error = %e, "Failed to resume after interruption");
            }
        }
    }

    /// Enter Stopping; the finalize job is then taken with
    /// [`take_finalize_job`](Self::take_finalize_job)
    pub fn request_stop(&mut self, reason: StopReason) -> CaptureResult<()> {
        self.session.transition(CaptureState::Stopping, "end")?;
        self.stop_reason = Some(reason);
        self.finalize_pending = true;
        tracing::info!(session = %self.session.id, ?reason, "Stopping video capture");
        Ok(())
    }

    /// Finalize job for a session that just entered Stopping, at most once
    pub fn take_finalize_job(&mut self) -> Option<FinalizeJob> {
        if !self.finalize_pending {
            return None;
        }
        self.finalize_pending = false;
        match self.writer.begin_finalize() {
            Ok(job) => Some(job),
            Err(e) => {
                self.fail(e.into());
                None
            }
        }
    }

    /// Apply the result of the finalize job
    ///
    /// A result arriving after the session was cancelled or failed only
    /// makes sure nothing is left at the destination.
    pub fn complete_stop(&mut self, result: WriterResult<OutputDescriptor>) {
        let state = self.session.state();
        let completed = self.writer.complete_finalize(result);
        if state != CaptureState::Stopping {
            tracing::debug!(%state, "Ignoring late finalize result");
            return;
        }

        match completed {
            Ok(output) => {
                if let Err(e) = self.session.transition(CaptureState::Ended, "finish") {
                    tracing::error!(error = %e, "Failed to end session");
                    return;
                }
                let captured_duration = self.session.accumulated(self.governing);
                tracing::info!(
                    path = %output.path.display(),
                    duration = %captured_duration,
                    "Video capture finished"
                );
                let thumbnail = self.thumbnail.take();
                self.report(Ok(VideoResult {
                    session_id: self.session.id,
                    path: output.path,
                    thumbnail,
                    captured_duration,
                    bytes: output.bytes,
                }));
            }
            Err(e) => {
                let _ = self.session.transition(CaptureState::Failed, "finish");
                let error = CaptureError::from(e);
                tracing::error!(error = %error, "Video capture failed");
                self.report(Err(CaptureFailure::from(&error)));
            }
        }
    }

    /// Abort the writer and discard the output
    pub fn cancel(&mut self) -> CaptureResult<()> {
        self.session.transition(CaptureState::Cancelled, "cancel")?;
        self.finalize_pending = false;
        let report = self.writer.abort();
        for error in &report.errors {
            tracing::warn!(%error, "Output not removed on cancel");
        }
        tracing::info!(session = %self.session.id, "Video capture cancelled");
        self.report(Err(CaptureFailure::cancelled()));
        Ok(())
    }

    /// Unrecoverable error: stop, discard the output and report once
    pub fn fail(&mut self, error: CaptureError) {
        let state = self.session.state();
        if state.is_terminal() {
            return;
        }
        tracing::error!(%state, error = %error, "Video capture failed");

        if matches!(state, CaptureState::Recording | CaptureState::Paused) {
            let _ = self.session.transition(CaptureState::Stopping, "fail");
        }
        self.finalize_pending = false;
        self.writer.abort();
        let _ = self.session.transition(CaptureState::Failed, "fail");
        self.report(Err(CaptureFailure::from(&error)));
    }

    fn report(&mut self, outcome: CaptureOutcome) {
        if self.reported {
            return;
        }
        self.reported = true;
        self.events.emit(VisionEvent::CapturedVideo(outcome.clone()));
        self.outcome = Some(outcome);
    }

    /// Terminal outcome, handed out once
    pub fn take_outcome(&mut self) -> Option<CaptureOutcome> {
        self.outcome.take()
    }
}
