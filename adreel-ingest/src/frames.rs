use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::command::{run_with_timeout, stderr_tail, CommandError, CommandExecutor};
use crate::config::FramesSection;
use crate::pipeline::Frame;
use crate::sampler::SampleTimestamps;
use crate::storage::{remove_if_exists, InvocationScope};

#[derive(Debug, Error)]
#[error("no frame could be captured from {attempted} sample point(s)")]
pub struct NoFramesError {
    pub attempted: usize,
}

#[derive(Debug, Error)]
enum CaptureError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("ffmpeg exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },
    #[error("ffmpeg produced no image at {0}")]
    MissingOutput(PathBuf),
    #[error("failed to read frame {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// How ffmpeg seeks to the requested timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Input seeking (`-ss` before `-i`): jumps to the nearest keyframe.
    Fast,
    /// Output seeking (`-ss` after `-i`): decodes up to the exact timestamp.
    Accurate,
}

impl fmt::Display for SeekMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SeekMode::Fast => "fast",
            SeekMode::Accurate => "accurate",
        })
    }
}

pub struct FrameExtractor {
    executor: Arc<dyn CommandExecutor>,
    ffmpeg: PathBuf,
    timeout: Duration,
    jpeg_quality: u8,
    max_width: Option<u32>,
}

impl FrameExtractor {
    pub fn new(executor: Arc<dyn CommandExecutor>, ffmpeg: PathBuf, section: &FramesSection) -> Self {
        Self {
            executor,
            ffmpeg,
            timeout: section.timeout(),
            jpeg_quality: section.jpeg_quality,
            max_width: section.max_width,
        }
    }

    /// Captures one frame per timestamp, in order. Individual failures are
    /// logged and skipped; only an empty result is an error.
    pub async fn extract_frames(
        &self,
        video: &Path,
        timestamps: &SampleTimestamps,
        scope: &InvocationScope,
    ) -> Result<Vec<Frame>, NoFramesError> {
        let mut frames = Vec::with_capacity(timestamps.len());
        for &timestamp in timestamps.iter() {
            let dest = scope.frame_path(timestamp);
            if let Some(frame) = self.extract_frame(video, timestamp, &dest).await {
                frames.push(frame);
            }
        }
        if frames.is_empty() {
            return Err(NoFramesError {
                attempted: timestamps.len(),
            });
        }
        debug!(
            invocation = scope.id(),
            captured = frames.len(),
            requested = timestamps.len(),
            "frame extraction finished"
        );
        Ok(frames)
    }

    /// Fast seek first, one accurate-seek retry, otherwise `None`. `dest` is
    /// always gone when this returns.
    pub async fn extract_frame(&self, video: &Path, timestamp: u32, dest: &Path) -> Option<Frame> {
        let mut last_error = None;
        for mode in [SeekMode::Fast, SeekMode::Accurate] {
            match self.capture(video, timestamp, dest, mode).await {
                Ok(data) => {
                    discard(dest).await;
                    return Some(Frame::jpeg(timestamp, data));
                }
                Err(err) => {
                    debug!(timestamp, mode = %mode, error = %err, "frame capture attempt failed");
                    discard(dest).await;
                    last_error = Some(err);
                }
            }
        }
        if let Some(err) = last_error {
            warn!(timestamp, error = %err, "skipping sample point after fast and accurate seek failed");
        }
        None
    }

    async fn capture(
        &self,
        video: &Path,
        timestamp: u32,
        dest: &Path,
        mode: SeekMode,
    ) -> Result<Vec<u8>, CaptureError> {
        let args = self.build_args(video, timestamp, dest, mode);
        let output = run_with_timeout(self.executor.as_ref(), &self.ffmpeg, &args, self.timeout).await?;
        if !output.status.success() {
            return Err(CaptureError::Failed {
                status: output.status.code(),
                stderr: stderr_tail(&output),
            });
        }
        let data = match fs::read(dest).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CaptureError::MissingOutput(dest.to_path_buf()))
            }
            Err(source) => {
                return Err(CaptureError::Io {
                    source,
                    path: dest.to_path_buf(),
                })
            }
        };
        if data.is_empty() {
            return Err(CaptureError::MissingOutput(dest.to_path_buf()));
        }
        Ok(data)
    }

    pub fn build_args(&self, video: &Path, timestamp: u32, dest: &Path, mode: SeekMode) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
        ];
        let seek: [OsString; 2] = ["-ss".into(), timestamp.to_string().into()];
        let input: [OsString; 2] = ["-i".into(), video.as_os_str().to_os_string()];
        match mode {
            SeekMode::Fast => {
                args.extend(seek);
                args.extend(input);
            }
            SeekMode::Accurate => {
                args.extend(input);
                args.extend(seek);
            }
        }
        args.extend(["-frames:v".into(), "1".into()]);
        if let Some(width) = self.max_width {
            args.extend(["-vf".into(), format!("scale='min({width},iw)':-2").into()]);
        }
        args.extend([
            "-q:v".into(),
            self.jpeg_quality.to_string().into(),
            dest.as_os_str().to_os_string(),
        ]);
        args
    }
}

async fn discard(path: &Path) {
    if let Err(err) = remove_if_exists(path).await {
        warn!(path = %path.display(), error = %err, "failed to remove frame file");
    }
}
