//! Serialized processing context
//!
//! A single tokio task owns the active [`CaptureStateMachine`]. Frames arrive
//! on one bounded queue per track, lifecycle requests on a command queue.
//! Before a command is handled every frame already queued is processed, so a
//! request observes all frames delivered before it. Finalize runs on the
//! blocking pool and reports back through its own queue.

use crate::capture::frame::Frame;
use crate::capture::geometry::OutputGeometry;
use crate::capture::traits::{AuthorizationStatus, DeviceEvent};
use crate::recorder::events::{CaptureOutcome, EventSender};
use crate::recorder::machine::{CaptureStateMachine, StopReason};
use crate::recorder::state::{RecordingSession, SessionSnapshot};
use crate::utils::error::{CaptureError, CaptureFailure, CaptureResult, ErrorCode, WriterError, WriterResult};
use crate::writer::stream::{OutputDescriptor, StreamWriter};
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

type Reply = oneshot::Sender<CaptureResult<()>>;

/// Requests handled by the processing task
pub(crate) enum Command {
    Start {
        session: RecordingSession,
        writer: StreamWriter,
        video_geometry: OutputGeometry,
        completion: oneshot::Sender<CaptureOutcome>,
        reply: Reply,
    },
    Pause(Reply),
    Resume(Reply),
    End(Reply),
    Cancel(Reply),
    Device(DeviceEvent),
}

/// Resolves once with the terminal outcome of a recording
pub struct CaptureCompletion {
    session_id: Uuid,
    rx: oneshot::Receiver<CaptureOutcome>,
}

impl CaptureCompletion {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

impl Future for CaptureCompletion {
    type Output = CaptureOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(CaptureFailure::new(
                    ErrorCode::SessionFailed,
                    "Capture processor stopped before the recording finished",
                ))
            })
        })
    }
}

struct Active {
    machine: CaptureStateMachine,
    completion: Option<oneshot::Sender<CaptureOutcome>>,
}

struct Processor {
    commands: mpsc::Receiver<Command>,
    audio: mpsc::Receiver<Frame>,
    video: mpsc::Receiver<Frame>,
    finalized_tx: mpsc::UnboundedSender<(Uuid, WriterResult<OutputDescriptor>)>,
    finalized_rx: mpsc::UnboundedReceiver<(Uuid, WriterResult<OutputDescriptor>)>,
    events: EventSender,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    active: Option<Active>,
}

/// Handle to the running processing task
///
/// Dropping the handle stops the task; an unfinished recording is cancelled.
pub(crate) struct ProcessorHandle {
    commands: mpsc::Sender<Command>,
}

impl ProcessorHandle {
    /// Spawn the processing task; must be called inside a tokio runtime
    pub(crate) fn spawn(
        audio: mpsc::Receiver<Frame>,
        video: mpsc::Receiver<Frame>,
        events: EventSender,
        snapshot: Arc<RwLock<SessionSnapshot>>,
    ) -> Self {
        let (commands_tx, commands) = mpsc::channel(32);
        let (finalized_tx, finalized_rx) = mpsc::unbounded_channel();
        let processor = Processor {
            commands,
            audio,
            video,
            finalized_tx,
            finalized_rx,
            events,
            snapshot,
            active: None,
        };
        tokio::spawn(processor.run());
        Self {
            commands: commands_tx,
        }
    }

    pub(crate) async fn send(&self, command: Command) -> CaptureResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CaptureError::ProcessorClosed)
    }

    /// Send a command carrying a reply channel and wait for the reply
    pub(crate) async fn request(&self, make: impl FnOnce(Reply) -> Command) -> CaptureResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| CaptureError::ProcessorClosed)?
    }

    pub(crate) async fn start(
        &self,
        session: RecordingSession,
        writer: StreamWriter,
        video_geometry: OutputGeometry,
    ) -> CaptureResult<CaptureCompletion> {
        let session_id = session.id;
        let (completion, rx) = oneshot::channel();
        self.request(|reply| Command::Start {
            session,
            writer,
            video_geometry,
            completion,
            reply,
        })
        .await?;
        Ok(CaptureCompletion { session_id, rx })
    }
}

impl Processor {
    async fn run(mut self) {
        tracing::debug!("Capture processor started");
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.drain_frames();
                    if let Some((reply, result)) = self.handle_command(command) {
                        // Accessors must see the new state once the caller is answered
                        self.after_step();
                        let _ = reply.send(result);
                    }
                }
                Some((session_id, result)) = self.finalized_rx.recv() => {
                    self.drain_frames();
                    self.handle_finalized(session_id, result);
                }
                Some(frame) = self.video.recv() => self.handle_frame(frame),
                Some(frame) = self.audio.recv() => self.handle_frame(frame),
            }
            self.after_step();
        }

        // Coordinator gone: nothing can finish the recording any more
        if let Some(active) = self.active.as_mut() {
            if !active.machine.state().is_terminal() {
                let _ = active.machine.cancel();
            }
        }
        self.after_step();
        tracing::debug!("Capture processor stopped");
    }

    fn drain_frames(&mut self) {
        while let Ok(frame) = self.video.try_recv() {
            self.handle_frame(frame);
        }
        while let Ok(frame) = self.audio.try_recv() {
            self.handle_frame(frame);
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        match self.active.as_mut() {
            Some(active) => {
                active.machine.handle_frame(&frame);
                // A maximum-duration stop must start finalizing before the next frame
                self.spawn_finalize();
            }
            None => tracing::trace!(track = %frame.track(), "Frame outside a recording"),
        }
    }

    fn handle_command(&mut self, command: Command) -> Option<(Reply, CaptureResult<()>)> {
        match command {
            Command::Start {
                session,
                writer,
                video_geometry,
                completion,
                reply,
            } => {
                let result = self.start(session, writer, video_geometry, completion);
                Some((reply, result))
            }
            Command::Pause(reply) => Some((reply, self.with_machine(|m| m.pause()))),
            Command::Resume(reply) => Some((reply, self.with_machine(|m| m.resume()))),
            Command::End(reply) => {
                let result = self.with_machine(|m| m.request_stop(StopReason::Requested));
                self.spawn_finalize();
                Some((reply, result))
            }
            Command::Cancel(reply) => Some((reply, self.with_machine(|m| m.cancel()))),
            Command::Device(event) => {
                self.handle_device_event(event);
                None
            }
        }
    }

    fn start(
        &mut self,
        session: RecordingSession,
        writer: StreamWriter,
        video_geometry: OutputGeometry,
        completion: oneshot::Sender<CaptureOutcome>,
    ) -> CaptureResult<()> {
        if let Some(active) = &self.active {
            if !active.machine.state().is_terminal() {
                return Err(CaptureError::AlreadyRecording);
            }
        }

        let machine = CaptureStateMachine::begin(session, writer, self.events.clone(), video_geometry)?;
        self.active = Some(Active {
            machine,
            completion: Some(completion),
        });
        Ok(())
    }

    fn with_machine(
        &mut self,
        op: impl FnOnce(&mut CaptureStateMachine) -> CaptureResult<()>,
    ) -> CaptureResult<()> {
        match self.active.as_mut() {
            Some(active) if !active.machine.state().is_terminal() => op(&mut active.machine),
            _ => Err(CaptureError::NotRecording),
        }
    }

    fn handle_device_event(&mut self, event: DeviceEvent) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let machine = &mut active.machine;
        match event {
            DeviceEvent::InterruptionBegan => machine.interrupt(),
            DeviceEvent::InterruptionEnded => machine.interruption_ended(),
            DeviceEvent::DeviceLost { reason } => machine.fail(CaptureError::DeviceLost(reason)),
            DeviceEvent::AuthorizationChanged { medium, status } => {
                if status == AuthorizationStatus::Denied && machine.session().required.contains(medium) {
                    machine.fail(CaptureError::PermissionDenied(format!(
                        "{} access revoked during recording",
                        medium
                    )));
                }
            }
        }
    }

    fn spawn_finalize(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(job) = active.machine.take_finalize_job() else {
            return;
        };
        let session_id = active.machine.session().id;
        let finalized = self.finalized_tx.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || job.run())
                .await
                .unwrap_or_else(|e| Err(WriterError::Encoder(format!("finalize task failed: {}", e))));
            let _ = finalized.send((session_id, result));
        });
    }

    fn handle_finalized(&mut self, session_id: Uuid, result: WriterResult<OutputDescriptor>) {
        match self.active.as_mut() {
            Some(active) if active.machine.session().id == session_id => {
                active.machine.complete_stop(result);
            }
            _ => tracing::debug!(%session_id, "Finalize result for a replaced session"),
        }
    }

    /// Publish the snapshot and resolve the completion once terminal
    fn after_step(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let session = active.machine.session();
        *self.snapshot.write() = SessionSnapshot::from(session);

        if let Some(outcome) = active.machine.take_outcome() {
            if let Some(completion) = active.completion.take() {
                let _ = completion.send(outcome);
            }
        }
    }
}
