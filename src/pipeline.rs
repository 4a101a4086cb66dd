use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::buffer::RollingFrameBuffer;
use crate::detect;
use crate::fps::FpsEstimator;
use crate::frame::Frame;
use crate::hotspot::{HotSpot, HotSpotSet};
use crate::session::{CaptureSession, SessionEvent, SessionStatus};

/// External mutation and inspection, marshaled through the core loop so the
/// hotspot set and session stay single-threaded.
#[derive(Debug)]
pub enum Command {
    AddHotSpot(HotSpot),
    RemoveHotSpot(usize),
    /// Any integer; clamped to [0, 255] on arrival.
    SetSensitivity(i32),
    /// Start a capture from the current buffer contents, full or not.
    /// Ignored while a capture is already running.
    TriggerCapture,
    Status(oneshot::Sender<StatusSnapshot>),
}

/// Point-in-time view of the pipeline for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: String,
    pub fps: u32,
    pub buffer_len: usize,
    pub buffer_capacity: usize,
    pub sensitivity: u8,
    pub post_frames: u32,
    pub hotspots: Vec<HotSpot>,
    pub captures_started: u64,
    pub session_frames: usize,
    pub session_remaining: u32,
}

/// Sender half of the command queue, shared by the API handlers.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Command>,
}

impl PipelineHandle {
    pub async fn send(&self, command: Command) -> Result<(), ControlError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ControlError::Closed)
    }

    pub async fn status(&self) -> Result<StatusSnapshot, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Status(tx)).await?;
        rx.await.map_err(|_| ControlError::Closed)
    }
}

/// Build the command channel connecting the API server to the core loop.
pub fn control_channel() -> (PipelineHandle, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(32);
    (PipelineHandle { tx }, rx)
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("capture pipeline is not running")]
    Closed,
}

/// Side effects of a drained command that the runner must act on.
#[derive(Default)]
pub struct CommandEffects {
    /// The hotspot set changed and should be written back to disk.
    pub hotspots_changed: bool,
    /// A trigger completed in place (zero post frames); persist it.
    pub completed: Option<CaptureSession>,
}

/// Per-tick orchestration: while a capture runs every frame feeds the
/// session and the rolling buffer stays frozen; otherwise the frame joins
/// the buffer and, once the window is full, the newest pair is scanned for
/// a triggering hotspot.
pub struct CapturePipeline {
    buffer: RollingFrameBuffer,
    session: CaptureSession,
    hotspots: HotSpotSet,
    sensitivity: u8,
    post_frames: u32,
    fps: FpsEstimator,
    current_fps: u32,
    captures_started: u64,
}

impl CapturePipeline {
    pub fn new(
        buffer_frames: usize,
        post_frames: u32,
        sensitivity: u8,
        hotspots: HotSpotSet,
    ) -> Self {
        Self {
            buffer: RollingFrameBuffer::new(buffer_frames),
            session: CaptureSession::new(),
            hotspots,
            sensitivity,
            post_frames,
            fps: FpsEstimator::new(Instant::now()),
            current_fps: 0,
            captures_started: 0,
        }
    }

    /// Process one acquired frame. A returned session has completed its
    /// quota and is ready to be finalized off the core loop; the pipeline
    /// itself is already Idle again with a cleared window.
    pub fn tick(&mut self, frame: Frame) -> Option<CaptureSession> {
        self.tick_at(frame, Instant::now())
    }

    /// [`Self::tick`] with an explicit clock, for tests.
    pub fn tick_at(&mut self, frame: Frame, now: Instant) -> Option<CaptureSession> {
        self.current_fps = self.fps.sample(now);

        if self.session.is_active() {
            match self.session.on_frame(frame) {
                SessionEvent::Completed => {
                    self.buffer.clear();
                    return Some(std::mem::take(&mut self.session));
                }
                SessionEvent::Appended { remaining } => {
                    debug!(remaining, "capture frame collected");
                }
                SessionEvent::Ignored => {}
            }
            return None;
        }

        self.buffer.push(frame);

        // Detection arms only once the window is full, so every capture
        // carries a complete pre-roll.
        if !self.buffer.is_full() || self.hotspots.is_empty() {
            return None;
        }
        let Some((newest, previous)) = self.buffer.newest_pair() else {
            return None;
        };

        if let Some(hit) = detect::scan(
            newest,
            Some(previous),
            self.hotspots.list(),
            self.sensitivity,
        ) {
            info!(
                hotspot = %self.hotspots.list()[hit.index],
                index = hit.index,
                mean_delta = format!("{:.2}", hit.mean_delta),
                threshold = self.sensitivity,
                fps = self.current_fps,
                "change detected"
            );
            return self.begin_capture(self.buffer.snapshot());
        }

        None
    }

    /// Apply one queued command. Runs on the core loop between frames.
    pub fn apply_command(&mut self, command: Command) -> CommandEffects {
        let mut effects = CommandEffects::default();
        match command {
            Command::AddHotSpot(spot) => {
                info!(hotspot = %spot, "hotspot added");
                self.hotspots.add(spot);
                effects.hotspots_changed = true;
            }
            Command::RemoveHotSpot(index) => match self.hotspots.remove_at(index) {
                Some(spot) => {
                    info!(index, hotspot = %spot, "hotspot removed");
                    effects.hotspots_changed = true;
                }
                None => {
                    warn!(
                        index,
                        count = self.hotspots.len(),
                        "hotspot index out of range"
                    );
                }
            },
            Command::SetSensitivity(value) => {
                let clamped = value.clamp(0, 255) as u8;
                if i32::from(clamped) != value {
                    warn!(requested = value, clamped, "sensitivity out of range");
                }
                info!(sensitivity = clamped, "sensitivity updated");
                self.sensitivity = clamped;
            }
            Command::TriggerCapture => {
                if self.session.is_active() {
                    info!("manual trigger ignored, capture already active");
                } else {
                    info!(buffered = self.buffer.len(), "manual capture triggered");
                    effects.completed = self.begin_capture(self.buffer.snapshot());
                }
            }
            Command::Status(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
        effects
    }

    /// End-of-life handling for a still-running capture. With `flush` the
    /// session is force-completed and returned for persistence; otherwise
    /// its frames are discarded.
    pub fn shutdown(&mut self, flush: bool) -> Option<CaptureSession> {
        if !self.session.is_active() {
            return None;
        }
        if flush {
            self.session.force_complete();
            Some(std::mem::take(&mut self.session))
        } else {
            self.session.discard();
            None
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.session.status().as_str().to_string(),
            fps: self.current_fps,
            buffer_len: self.buffer.len(),
            buffer_capacity: self.buffer.capacity(),
            sensitivity: self.sensitivity,
            post_frames: self.post_frames,
            hotspots: self.hotspots.list().to_vec(),
            captures_started: self.captures_started,
            session_frames: self.session.frame_count(),
            session_remaining: self.session.remaining(),
        }
    }

    pub fn hotspots(&self) -> &HotSpotSet {
        &self.hotspots
    }

    // Seeds a new session and counts it. A session that completes in place
    // (zero post frames) is handed back immediately.
    fn begin_capture(&mut self, pre_roll: Vec<Frame>) -> Option<CaptureSession> {
        if !self
            .session
            .start(pre_roll, self.post_frames, self.current_fps)
        {
            return None;
        }
        self.captures_started += 1;
        if self.session.status() == SessionStatus::Finalizing {
            self.buffer.clear();
            return Some(std::mem::take(&mut self.session));
        }
        None
    }
}
