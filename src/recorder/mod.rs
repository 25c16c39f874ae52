//! Recording system module
//!
//! - [`SessionCoordinator`] is the entry point hosts construct
//! - [`CaptureStateMachine`] gates and writes frames for one recording
//! - [`TimestampRebaser`] removes pause gaps from the output timeline
//! - the processor task serializes frames and lifecycle requests

pub mod coordinator;
pub mod events;
pub mod machine;
mod processor;
pub mod rebaser;
pub mod state;

pub use coordinator::{MuxerFactory, SessionCoordinator};
pub use events::{CaptureOutcome, EventKind, EventSender, EventSubscription, VideoResult, VisionEvent};
pub use machine::{CaptureStateMachine, DropReason, FrameDisposition, StopReason};
pub use processor::CaptureCompletion;
pub use rebaser::{RebaseRejection, TimestampRebaser, TrackTimeline};
pub use state::{CaptureState, RecordingSession, RequiredTracks, SessionSnapshot, TrackState};
