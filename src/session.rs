use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::frame::Frame;
use crate::store::{ArtifactStore, StoreError, VIDEO_FILE_NAME};
use crate::video::{SinkError, VideoSink};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Capturing,
    Finalizing,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Finalizing => "finalizing",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of feeding one frame to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Frame appended; this many more frames complete the session.
    Appended { remaining: u32 },
    /// Frame appended and the quota was reached; the session is now
    /// Finalizing. Reported exactly once per capture.
    Completed,
    /// The session was not capturing; the frame was dropped.
    Ignored,
}

#[derive(Default)]
enum State {
    #[default]
    Idle,
    /// Accumulating live frames until `remaining` reaches zero.
    /// Invariant: `remaining` is never zero inside this variant.
    Capturing {
        frames: Vec<Frame>,
        remaining: u32,
        fps: u32,
        started_at: DateTime<Local>,
    },
    /// Full sequence held, waiting for exactly one finalize call.
    Finalizing {
        frames: Vec<Frame>,
        fps: u32,
        started_at: DateTime<Local>,
    },
}

/// A bounded recording around one trigger: the pre-roll cloned from the
/// rolling buffer plus `future_count` live frames, then a single finalize.
///
/// Legal transitions are Idle → Capturing → Finalizing → Idle only. Both
/// finalize paths leave the session Idle even when storage fails: the frame
/// sequence is moved out before any I/O and dropped with the error.
#[derive(Default)]
pub struct CaptureSession {
    state: State,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a capture. Valid from Idle only; in any other state this is a
    /// no-op returning false and the existing session is untouched.
    ///
    /// Takes ownership of the already-cloned pre-roll. A zero `future_count`
    /// goes straight to Finalizing.
    pub fn start(&mut self, pre_roll: Vec<Frame>, future_count: u32, fps: u32) -> bool {
        if !matches!(self.state, State::Idle) {
            debug!(status = %self.status(), "capture already in progress, start ignored");
            return false;
        }
        let started_at = Local::now();
        info!(
            pre_roll = pre_roll.len(),
            future_count, fps, "capture started"
        );
        self.state = if future_count == 0 {
            State::Finalizing {
                frames: pre_roll,
                fps,
                started_at,
            }
        } else {
            State::Capturing {
                frames: pre_roll,
                remaining: future_count,
                fps,
                started_at,
            }
        };
        true
    }

    /// Feed one live frame. Appends while Capturing; `Completed` marks the
    /// transition to Finalizing. In any other state the frame is dropped.
    pub fn on_frame(&mut self, frame: Frame) -> SessionEvent {
        match std::mem::take(&mut self.state) {
            State::Capturing {
                mut frames,
                remaining,
                fps,
                started_at,
            } => {
                frames.push(frame);
                let remaining = remaining - 1;
                if remaining == 0 {
                    info!(frames = frames.len(), "capture quota reached, finalizing");
                    self.state = State::Finalizing {
                        frames,
                        fps,
                        started_at,
                    };
                    SessionEvent::Completed
                } else {
                    self.state = State::Capturing {
                        frames,
                        remaining,
                        fps,
                        started_at,
                    };
                    SessionEvent::Appended { remaining }
                }
            }
            other => {
                self.state = other;
                SessionEvent::Ignored
            }
        }
    }

    /// Move a Capturing session to Finalizing regardless of its remaining
    /// quota. Shutdown flush path. Returns true if a transition happened.
    pub fn force_complete(&mut self) -> bool {
        match std::mem::take(&mut self.state) {
            State::Capturing {
                frames,
                remaining,
                fps,
                started_at,
            } => {
                info!(
                    frames = frames.len(),
                    remaining, "forcing capture completion"
                );
                self.state = State::Finalizing {
                    frames,
                    fps,
                    started_at,
                };
                true
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    /// Drop every held frame and return to Idle. Returns the number dropped.
    pub fn discard(&mut self) -> usize {
        match std::mem::take(&mut self.state) {
            State::Idle => 0,
            State::Capturing { frames, .. } | State::Finalizing { frames, .. } => {
                warn!(frames = frames.len(), "discarding capture");
                frames.len()
            }
        }
    }

    /// Persist the finished sequence as numbered PNGs in a fresh capture
    /// directory. Valid only while Finalizing. Returns the directory.
    pub fn finalize_as_images(&mut self, store: &ArtifactStore) -> Result<PathBuf, CaptureError> {
        let (frames, _fps, started_at) = self.take_finalizing()?;
        let dir = store.create_capture_dir(&started_at)?;
        let written = store.write_image_sequence(&dir, &frames)?;
        info!(
            dir = dir.display().to_string(),
            frames = written,
            "image sequence written"
        );
        Ok(dir)
    }

    /// Persist the finished sequence through `sink` as a single video file
    /// at the session's frame rate. Valid only while Finalizing.
    pub fn finalize_as_video(
        &mut self,
        store: &ArtifactStore,
        sink: &dyn VideoSink,
    ) -> Result<PathBuf, CaptureError> {
        let (frames, fps, started_at) = self.take_finalizing()?;
        let dir = store.create_capture_dir(&started_at)?;
        sink.write(&dir.join(VIDEO_FILE_NAME), &frames, fps)?;
        info!(
            dir = dir.display().to_string(),
            frames = frames.len(),
            fps,
            "video written"
        );
        Ok(dir)
    }

    // Moves the sequence out and leaves the session Idle before any I/O,
    // so a failing writer cannot strand frames in Finalizing.
    fn take_finalizing(&mut self) -> Result<(Vec<Frame>, u32, DateTime<Local>), CaptureError> {
        match std::mem::take(&mut self.state) {
            State::Finalizing {
                frames,
                fps,
                started_at,
            } => Ok((frames, fps, started_at)),
            other => {
                self.state = other;
                Err(CaptureError::NotFinalizing(self.status()))
            }
        }
    }

    // -- Accessors ---------------------------------------------------------

    pub fn status(&self) -> SessionStatus {
        match self.state {
            State::Idle => SessionStatus::Idle,
            State::Capturing { .. } => SessionStatus::Capturing,
            State::Finalizing { .. } => SessionStatus::Finalizing,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Frames currently held (pre-roll plus live).
    pub fn frame_count(&self) -> usize {
        match &self.state {
            State::Idle => 0,
            State::Capturing { frames, .. } | State::Finalizing { frames, .. } => frames.len(),
        }
    }

    /// Live frames still owed before the session completes.
    pub fn remaining(&self) -> u32 {
        match &self.state {
            State::Capturing { remaining, .. } => *remaining,
            _ => 0,
        }
    }

    /// Frame rate recorded when the capture started.
    pub fn fps(&self) -> u32 {
        match &self.state {
            State::Capturing { fps, .. } | State::Finalizing { fps, .. } => *fps,
            State::Idle => 0,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        match &self.state {
            State::Capturing { started_at, .. } | State::Finalizing { started_at, .. } => {
                Some(*started_at)
            }
            State::Idle => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("session is {0}, not finalizing")]
    NotFinalizing(SessionStatus),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    fn fill(value: u8) -> Frame {
        Frame::packed(2, 2, vec![value; 12]).unwrap()
    }

    struct RecordingSink {
        calls: Mutex<Vec<(PathBuf, usize, u32)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl VideoSink for RecordingSink {
        fn write(&self, path: &Path, frames: &[Frame], fps: u32) -> Result<(), SinkError> {
            self.calls
                .lock()
                .unwrap()
                .push((path.to_path_buf(), frames.len(), fps));
            Ok(())
        }
    }

    struct FailingSink;

    impl VideoSink for FailingSink {
        fn write(&self, _path: &Path, _frames: &[Frame], _fps: u32) -> Result<(), SinkError> {
            Err(SinkError::Spawn("sink down".into()))
        }
    }

    fn temp_store(tag: &str) -> (ArtifactStore, PathBuf) {
        let root = std::env::temp_dir().join(format!("session_{tag}_{}", std::process::id()));
        let store = ArtifactStore::new(&root);
        store.ensure_root().unwrap();
        (store, root)
    }

    #[test]
    fn collects_pre_roll_plus_future_count() {
        let mut session = CaptureSession::new();
        assert!(session.start(vec![fill(1), fill(2)], 3, 12));
        assert_eq!(session.status(), SessionStatus::Capturing);
        assert_eq!(session.frame_count(), 2);
        assert_eq!(session.remaining(), 3);
        assert_eq!(session.fps(), 12);

        assert_eq!(
            session.on_frame(fill(3)),
            SessionEvent::Appended { remaining: 2 }
        );
        assert_eq!(
            session.on_frame(fill(4)),
            SessionEvent::Appended { remaining: 1 }
        );
        assert_eq!(session.status(), SessionStatus::Capturing);

        assert_eq!(session.on_frame(fill(5)), SessionEvent::Completed);
        assert_eq!(session.status(), SessionStatus::Finalizing);
        assert_eq!(session.frame_count(), 5);

        // Frames after completion are dropped, not appended.
        assert_eq!(session.on_frame(fill(6)), SessionEvent::Ignored);
        assert_eq!(session.frame_count(), 5);
    }

    #[test]
    fn start_is_rejected_unless_idle() {
        let mut session = CaptureSession::new();
        assert!(session.start(vec![fill(1)], 2, 10));
        assert!(!session.start(vec![fill(9), fill(9)], 5, 20));
        assert_eq!(session.frame_count(), 1);
        assert_eq!(session.remaining(), 2);
        assert_eq!(session.fps(), 10);

        session.on_frame(fill(2));
        session.on_frame(fill(3));
        assert_eq!(session.status(), SessionStatus::Finalizing);
        assert!(!session.start(vec![fill(9)], 1, 20));
        assert_eq!(session.frame_count(), 3);
    }

    #[test]
    fn zero_future_count_finalizes_immediately() {
        let mut session = CaptureSession::new();
        assert!(session.start(vec![fill(1), fill(2)], 0, 8));
        assert_eq!(session.status(), SessionStatus::Finalizing);
        assert_eq!(session.frame_count(), 2);
    }

    #[test]
    fn force_complete_flushes_a_running_capture() {
        let mut session = CaptureSession::new();
        assert!(!session.force_complete());

        session.start(vec![fill(1)], 10, 5);
        session.on_frame(fill(2));
        assert!(session.force_complete());
        assert_eq!(session.status(), SessionStatus::Finalizing);
        assert_eq!(session.frame_count(), 2);
        assert!(!session.force_complete());
    }

    #[test]
    fn discard_drops_all_frames() {
        let mut session = CaptureSession::new();
        assert_eq!(session.discard(), 0);

        session.start(vec![fill(1), fill(2)], 1, 5);
        assert_eq!(session.discard(), 2);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.frame_count(), 0);
    }

    #[test]
    fn finalize_images_writes_sequence_and_resets() {
        let (store, root) = temp_store("images");
        let mut session = CaptureSession::new();
        session.start(vec![fill(1)], 2, 10);
        session.on_frame(fill(2));
        session.on_frame(fill(3));

        let dir = session.finalize_as_images(&store).unwrap();
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(dir.join("image0.png").exists());
        assert!(dir.join("image1.png").exists());
        assert!(dir.join("image2.png").exists());
        assert!(!dir.join("image3.png").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn finalize_video_hands_the_sink_the_whole_sequence() {
        let (store, root) = temp_store("video");
        let sink = RecordingSink::new();
        let mut session = CaptureSession::new();
        session.start(vec![fill(1), fill(2)], 1, 15);
        session.on_frame(fill(3));

        let dir = session.finalize_as_video(&store, &sink).unwrap();
        assert_eq!(session.status(), SessionStatus::Idle);

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (path, frames, fps) = &calls[0];
        assert_eq!(path, &dir.join(VIDEO_FILE_NAME));
        assert_eq!(*frames, 3);
        assert_eq!(*fps, 15);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn finalize_requires_finalizing_state() {
        let (store, root) = temp_store("state_check");
        let mut session = CaptureSession::new();
        assert!(matches!(
            session.finalize_as_images(&store),
            Err(CaptureError::NotFinalizing(SessionStatus::Idle))
        ));

        session.start(vec![fill(1)], 2, 10);
        assert!(matches!(
            session.finalize_as_images(&store),
            Err(CaptureError::NotFinalizing(SessionStatus::Capturing))
        ));
        // The running capture is untouched by the failed call.
        assert_eq!(session.status(), SessionStatus::Capturing);
        assert_eq!(session.frame_count(), 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn sink_failure_still_returns_the_session_to_idle() {
        let (store, root) = temp_store("sink_failure");
        let mut session = CaptureSession::new();
        session.start(vec![fill(1)], 1, 10);
        session.on_frame(fill(2));

        let result = session.finalize_as_video(&store, &FailingSink);
        assert!(matches!(result, Err(CaptureError::Sink(_))));
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.frame_count(), 0);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn store_failure_still_returns_the_session_to_idle() {
        // A plain file where the data root should be makes create_dir fail.
        let root = std::env::temp_dir().join(format!(
            "session_store_failure_{}",
            std::process::id()
        ));
        std::fs::write(&root, b"not a directory").unwrap();
        let store = ArtifactStore::new(&root);

        let mut session = CaptureSession::new();
        session.start(vec![fill(1)], 0, 10);
        let result = session.finalize_as_images(&store);
        assert!(matches!(result, Err(CaptureError::Store(_))));
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.frame_count(), 0);

        let _ = std::fs::remove_file(&root);
    }
}
