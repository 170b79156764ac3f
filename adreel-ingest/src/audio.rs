use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::command::{run_with_timeout, stderr_tail, CommandError, CommandExecutor};
use crate::config::AudioSection;
use crate::pipeline::AudioTrack;
use crate::storage::remove_if_exists;

#[derive(Debug, Error)]
pub enum AudioExtractionError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("ffmpeg audio pass exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },
    #[error("ffmpeg produced no audio at {0}")]
    MissingOutput(PathBuf),
}

pub struct AudioExtractor {
    executor: Arc<dyn CommandExecutor>,
    ffmpeg: PathBuf,
    codec: String,
    sample_rate: u32,
    channels: u8,
    bitrate: String,
    timeout: Duration,
}

impl AudioExtractor {
    pub fn new(executor: Arc<dyn CommandExecutor>, ffmpeg: PathBuf, section: &AudioSection) -> Self {
        Self {
            executor,
            ffmpeg,
            codec: section.codec.clone(),
            sample_rate: section.sample_rate,
            channels: section.channels,
            bitrate: section.bitrate.clone(),
            timeout: section.timeout(),
        }
    }

    /// Single pass, no retry. On any failure `dest` is removed.
    pub async fn extract_audio(&self, video: &Path, dest: &Path) -> Result<AudioTrack, AudioExtractionError> {
        match self.run(video, dest).await {
            Ok(size) => {
                info!(path = %dest.display(), size_bytes = size, "audio extracted");
                Ok(AudioTrack {
                    path: dest.to_path_buf(),
                })
            }
            Err(err) => {
                if let Err(io) = remove_if_exists(dest).await {
                    warn!(path = %dest.display(), error = %io, "failed to remove partial audio");
                }
                Err(err)
            }
        }
    }

    async fn run(&self, video: &Path, dest: &Path) -> Result<u64, AudioExtractionError> {
        let args = self.build_args(video, dest);
        let output = run_with_timeout(self.executor.as_ref(), &self.ffmpeg, &args, self.timeout).await?;
        if !output.status.success() {
            return Err(AudioExtractionError::Failed {
                status: output.status.code(),
                stderr: stderr_tail(&output),
            });
        }
        match fs::metadata(dest).await {
            Ok(meta) if meta.len() > 0 => Ok(meta.len()),
            _ => Err(AudioExtractionError::MissingOutput(dest.to_path_buf())),
        }
    }

    pub fn build_args(&self, video: &Path, dest: &Path) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            video.as_os_str().to_os_string(),
            "-vn".into(),
            "-acodec".into(),
            self.codec.clone().into(),
            "-ar".into(),
            self.sample_rate.to_string().into(),
            "-ac".into(),
            self.channels.to_string().into(),
            "-b:a".into(),
            self.bitrate.clone().into(),
            dest.as_os_str().to_os_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::process::Output;

    #[cfg(unix)]
    use std::os::unix::process::ExitStatusExt;
    #[cfg(windows)]
    use std::os::windows::process::ExitStatusExt;

    /// Writes `payload` to the last argument, then exits with `code`.
    struct FakeFfmpeg {
        code: i32,
        payload: &'static [u8],
    }

    #[async_trait]
    impl CommandExecutor for FakeFfmpeg {
        async fn run(&self, _program: &Path, args: &[OsString]) -> std::io::Result<Output> {
            if let Some(out) = args.last() {
                std::fs::write(out, self.payload)?;
            }
            #[cfg(unix)]
            let status = std::process::ExitStatus::from_raw(self.code << 8);
            #[cfg(windows)]
            let status = std::process::ExitStatus::from_raw(self.code as u32);
            Ok(Output {
                status,
                stdout: Vec::new(),
                stderr: b"Output file #0 does not contain any stream\n".to_vec(),
            })
        }
    }

    fn extractor(code: i32, payload: &'static [u8]) -> AudioExtractor {
        AudioExtractor::new(
            Arc::new(FakeFfmpeg { code, payload }),
            PathBuf::from("ffmpeg"),
            &AudioSection::default(),
        )
    }

    #[test]
    fn args_follow_audio_section() {
        let args: Vec<String> = extractor(0, b"")
            .build_args(Path::new("in.mp4"), Path::new("out.mp3"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let joined = args.join(" ");
        assert!(joined.contains("-i in.mp4 -vn -acodec libmp3lame -ar 16000 -ac 1 -b:a 64k out.mp3"));
    }

    #[tokio::test]
    async fn successful_pass_returns_track() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio.mp3");
        let track = extractor(0, b"ID3audio")
            .extract_audio(Path::new("in.mp4"), &dest)
            .await
            .unwrap();
        assert_eq!(track.path(), dest.as_path());
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn failure_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio.mp3");
        let err = extractor(1, b"partial")
            .extract_audio(Path::new("in.mp4"), &dest)
            .await
            .unwrap_err();
        match err {
            AudioExtractionError::Failed { status, stderr } => {
                assert_eq!(status, Some(1));
                assert!(stderr.contains("does not contain any stream"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn empty_output_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio.mp3");
        let err = extractor(0, b"")
            .extract_audio(Path::new("in.mp4"), &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, AudioExtractionError::MissingOutput(_)));
        assert!(!dest.exists());
    }
}
