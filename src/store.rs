use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use tracing::debug;

use crate::frame::Frame;

/// File name of the video artifact inside a capture directory.
pub const VIDEO_FILE_NAME: &str = "video.avi";

/// How a finished capture is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `image0.png`, `image1.png`, ... one file per frame.
    ImageSequence,
    /// A single `video.avi` encoded at the session's frame rate.
    Video,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageSequence => "images",
            Self::Video => "video",
        }
    }
}

/// Local artifact layout: one directory per capture under the data root,
/// named from the capture start time.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the data root if it does not exist yet.
    pub fn ensure_root(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| StoreError::CreateDir(self.root.display().to_string(), e))
    }

    /// Create the per-capture directory for a session started at `at`.
    pub fn create_capture_dir<Tz: TimeZone>(
        &self,
        at: &DateTime<Tz>,
    ) -> Result<PathBuf, StoreError>
    where
        Tz::Offset: fmt::Display,
    {
        let dir = self.root.join(capture_dir_name(at));
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::CreateDir(dir.display().to_string(), e))?;
        debug!(dir = dir.display().to_string(), "capture directory created");
        Ok(dir)
    }

    /// Write `frames` into `dir` as `image0.png`, `image1.png`, ... in
    /// capture order. Returns the number of files written.
    pub fn write_image_sequence(&self, dir: &Path, frames: &[Frame]) -> Result<usize, StoreError> {
        for (n, frame) in frames.iter().enumerate() {
            let path = dir.join(format!("image{n}.png"));
            frame
                .to_rgb_image()
                .save(&path)
                .map_err(|e| StoreError::EncodeImage(path.display().to_string(), e))?;
        }
        Ok(frames.len())
    }
}

/// Capture directory name: start time as `YYYYMMDD_HHMMSS` plus the
/// sub-second part in hundred-nanosecond units, zero-padded to 7 digits.
pub fn capture_dir_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    let fraction = at.timestamp_subsec_nanos() / 100;
    format!("{}_{fraction:07}", at.format("%Y%m%d_%H%M%S"))
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to write image {0}: {1}")]
    EncodeImage(String, image::ImageError),
}
