use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, error, warn};

use crate::frame::Frame;

/// Consumes an ordered frame sequence plus a frame rate and produces a video
/// artifact at `path`. The capture pipeline never names a container format;
/// that detail belongs to the sink.
pub trait VideoSink: Send + Sync {
    fn write(&self, path: &Path, frames: &[Frame], fps: u32) -> Result<(), SinkError>;
}

/// Pipes raw RGB24 rows into an ffmpeg subprocess. The first frame defines
/// the stream dimensions; every later frame must match.
pub struct FfmpegSink {
    codec: String,
    quality: u32,
}

impl FfmpegSink {
    pub fn new(codec: impl Into<String>, quality: u32) -> Self {
        Self {
            codec: codec.into(),
            quality,
        }
    }

    fn build_args(&self, width: u32, height: u32, fps: u32, path: &Path) -> Vec<String> {
        let vcodec = match self.codec.as_str() {
            "h264" => "libx264",
            _ => "mpeg4",
        };
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pixel_format".into(),
            "rgb24".into(),
            "-video_size".into(),
            format!("{width}x{height}"),
            "-framerate".into(),
            fps.max(1).to_string(),
            "-i".into(),
            "pipe:0".into(),
            "-c:v".into(),
            vcodec.into(),
            "-q:v".into(),
            self.quality.to_string(),
            "-y".into(),
            path.display().to_string(),
        ]
    }
}

impl VideoSink for FfmpegSink {
    fn write(&self, path: &Path, frames: &[Frame], fps: u32) -> Result<(), SinkError> {
        let first = frames.first().ok_or(SinkError::NoFrames)?;
        let (width, height) = first.dimensions();
        for (index, frame) in frames.iter().enumerate() {
            let (got_w, got_h) = frame.dimensions();
            if (got_w, got_h) != (width, height) {
                return Err(SinkError::DimensionMismatch {
                    index,
                    got_w,
                    got_h,
                    want_w: width,
                    want_h: height,
                });
            }
        }

        let args = self.build_args(width, height, fps, path);
        debug!(
            codec = self.codec,
            quality = self.quality,
            fps = fps.max(1),
            frames = frames.len(),
            output = path.display().to_string(),
            "spawning ffmpeg"
        );

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SinkError::Spawn(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SinkError::Spawn("could not get stdin handle".into()))?;
        for frame in frames {
            for y in 0..frame.height() {
                stdin
                    .write_all(frame.row(y))
                    .map_err(|e| SinkError::Write(e.to_string()))?;
            }
        }
        // Close stdin so ffmpeg knows there are no more frames.
        drop(stdin);

        let output = child
            .wait_with_output()
            .map_err(|e| SinkError::Wait(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(stderr = %stderr, "ffmpeg exited with error");
            return Err(SinkError::FfmpegFailed(stderr.into_owned()));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("no frames to encode")]
    NoFrames,
    #[error("frame {index} is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    DimensionMismatch {
        index: usize,
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("failed to write frame to ffmpeg stdin: {0}")]
    Write(String),
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(String),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
}

/// Check whether ffmpeg is available on PATH. Logs a warning if not found.
pub fn check_ffmpeg_available() {
    match Command::new("ffmpeg").arg("-version").output() {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; video captures may fail");
        }
        Err(e) => {
            warn!(
                error = %e,
                "ffmpeg not found on PATH; video captures will fail. \
                 Install ffmpeg or switch capture.output to \"images\"."
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_is_rejected_before_spawning() {
        let sink = FfmpegSink::new("mpeg4", 5);
        let result = sink.write(Path::new("/nonexistent/video.avi"), &[], 10);
        assert!(matches!(result, Err(SinkError::NoFrames)));
    }

    #[test]
    fn mixed_dimensions_are_rejected_before_spawning() {
        let sink = FfmpegSink::new("mpeg4", 5);
        let frames = vec![
            Frame::packed(2, 2, vec![0; 12]).unwrap(),
            Frame::packed(4, 2, vec![0; 24]).unwrap(),
        ];
        let result = sink.write(Path::new("/nonexistent/video.avi"), &frames, 10);
        assert!(matches!(
            result,
            Err(SinkError::DimensionMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn args_pin_the_rawvideo_contract() {
        let sink = FfmpegSink::new("mpeg4", 5);
        let args = sink.build_args(640, 480, 15, Path::new("out/video.avi"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo"));
        assert!(joined.contains("-pixel_format rgb24"));
        assert!(joined.contains("-video_size 640x480"));
        assert!(joined.contains("-framerate 15"));
        assert!(joined.contains("-c:v mpeg4"));
        assert!(joined.contains("-q:v 5"));
        assert!(joined.ends_with("out/video.avi"));
    }

    #[test]
    fn zero_fps_is_floored_to_one() {
        let sink = FfmpegSink::new("h264", 3);
        let args = sink.build_args(4, 4, 0, Path::new("video.avi"));
        let joined = args.join(" ");
        assert!(joined.contains("-framerate 1"));
        assert!(joined.contains("-c:v libx264"));
    }
}
