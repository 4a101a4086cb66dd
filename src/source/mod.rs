use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::frame::{Frame, FrameError};

pub mod http;

pub use http::{MjpegSource, SnapshotSource};

/// A blocking supplier of raw RGB24 frames at a fixed geometry.
///
/// Implementations own their transport and block in
/// [`FrameSource::next_frame`] until a frame is available. They run on a
/// dedicated OS thread, never on the async runtime.
pub trait FrameSource: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Bytes per row in the buffers handed out by `next_frame`.
    fn stride(&self) -> usize;
    /// True when rows arrive bottom-up and must be flipped before use.
    fn bottom_up(&self) -> bool {
        false
    }
    /// Block until the next frame arrives. The buffer is `stride * height`
    /// bytes of RGB24.
    fn next_frame(&mut self) -> Result<Vec<u8>, SourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("HTTP body error: {0}")]
    HttpBody(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(#[from] std::io::Error),
    #[error("stream ended")]
    StreamEnded,
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("got a {got_w}x{got_h} frame, configured for {want_w}x{want_h}")]
    GeometryMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Run a source on its own OS thread, assembling validated frames and
/// handing them to the core loop over a capacity-1 channel. When the loop
/// falls behind, the send blocks and the source sees natural backpressure
/// instead of a growing backlog.
///
/// Acquisition failures are forwarded as `Err` items so the receiver can
/// log and skip them. The thread exits once the receiver is dropped.
pub fn spawn_acquisition(
    mut source: Box<dyn FrameSource>,
) -> (mpsc::Receiver<Result<Frame, SourceError>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1);
    let handle = std::thread::spawn(move || {
        let width = source.width();
        let height = source.height();
        let stride = source.stride();
        let bottom_up = source.bottom_up();
        info!(width, height, stride, bottom_up, "acquisition thread started");

        loop {
            let item = source.next_frame().and_then(|raw| {
                let mut frame = Frame::from_raw(width, height, stride, raw)?;
                if bottom_up {
                    frame.flip_vertical();
                }
                Ok(frame)
            });
            if let Err(e) = &item {
                warn!(error = %e, "frame acquisition failed");
            }
            if tx.blocking_send(item).is_err() {
                info!("frame channel closed, stopping acquisition");
                break;
            }
        }
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedSource {
        width: u32,
        height: u32,
        bottom_up: bool,
        frames: std::vec::IntoIter<Vec<u8>>,
    }

    impl FrameSource for ScriptedSource {
        fn width(&self) -> u32 {
            self.width
        }
        fn height(&self) -> u32 {
            self.height
        }
        fn stride(&self) -> usize {
            self.width as usize * 3
        }
        fn bottom_up(&self) -> bool {
            self.bottom_up
        }
        fn next_frame(&mut self) -> Result<Vec<u8>, SourceError> {
            self.frames.next().ok_or(SourceError::StreamEnded)
        }
    }

    #[test]
    fn frames_arrive_validated_and_flipped() {
        // 2x2 with distinct rows so the flip is observable.
        let raw = vec![
            1, 1, 1, 2, 2, 2, // row 0
            3, 3, 3, 4, 4, 4, // row 1
        ];
        let source = ScriptedSource {
            width: 2,
            height: 2,
            bottom_up: true,
            frames: vec![raw].into_iter(),
        };

        let (mut rx, handle) = spawn_acquisition(Box::new(source));
        let frame = rx.blocking_recv().unwrap().unwrap();
        assert_eq!(frame.row(0), &[3, 3, 3, 4, 4, 4]);
        assert_eq!(frame.row(1), &[1, 1, 1, 2, 2, 2]);

        // Source exhausted: failures are forwarded, not swallowed.
        let err = rx.blocking_recv().unwrap();
        assert!(matches!(err, Err(SourceError::StreamEnded)));

        drop(rx);
        handle.join().unwrap();
    }

    #[test]
    fn bad_geometry_from_the_source_is_an_error_item() {
        let source = ScriptedSource {
            width: 2,
            height: 2,
            bottom_up: false,
            frames: vec![vec![0u8; 5]].into_iter(), // short buffer
        };

        let (mut rx, handle) = spawn_acquisition(Box::new(source));
        let item = rx.blocking_recv().unwrap();
        assert!(matches!(item, Err(SourceError::Frame(_))));

        drop(rx);
        handle.join().unwrap();
    }
}
