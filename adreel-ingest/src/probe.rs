use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::command::{run_with_timeout, stderr_tail, CommandError, CommandExecutor};
use crate::config::ProbeSection;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("ffprobe could not read {path}: {stderr}")]
    Failed { path: PathBuf, stderr: String },
    #[error("invalid ffprobe payload: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaMetadata {
    pub duration_seconds: f64,
    pub format_name: Option<String>,
    /// The container did not report a usable duration; the fallback was used.
    pub duration_estimated: bool,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

pub struct MediaProber {
    executor: Arc<dyn CommandExecutor>,
    ffprobe: PathBuf,
    timeout: Duration,
    fallback_duration: f64,
}

impl MediaProber {
    pub fn new(executor: Arc<dyn CommandExecutor>, ffprobe: PathBuf, section: &ProbeSection) -> Self {
        Self {
            executor,
            ffprobe,
            timeout: section.timeout(),
            fallback_duration: section.fallback_duration_seconds,
        }
    }

    pub async fn probe(&self, path: &Path) -> Result<MediaMetadata, ProbeError> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            path.as_os_str().to_os_string(),
        ];
        let output = run_with_timeout(self.executor.as_ref(), &self.ffprobe, &args, self.timeout).await?;
        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: path.to_path_buf(),
                stderr: stderr_tail(&output),
            });
        }
        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        Ok(self.metadata_from(parsed.format, path))
    }

    fn metadata_from(&self, format: FfprobeFormat, path: &Path) -> MediaMetadata {
        let duration = format
            .duration
            .as_deref()
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value > 0.0);
        match duration {
            Some(duration_seconds) => {
                debug!(path = %path.display(), duration_seconds, "probed media");
                MediaMetadata {
                    duration_seconds,
                    format_name: format.format_name,
                    duration_estimated: false,
                }
            }
            None => {
                warn!(
                    path = %path.display(),
                    fallback = self.fallback_duration,
                    "container reports no duration, using fallback"
                );
                MediaMetadata {
                    duration_seconds: self.fallback_duration,
                    format_name: format.format_name,
                    duration_estimated: true,
                }
            }
        }
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

    struct CannedProbe {
        code: i32,
        stdout: &'static str,
    }

    #[async_trait]
    impl CommandExecutor for CannedProbe {
        async fn run(&self, _program: &Path, args: &[OsString]) -> std::io::Result<Output> {
            assert!(args.iter().any(|arg| arg == "-show_format"));
            #[cfg(unix)]
            let status = std::process::ExitStatus::from_raw(self.code << 8);
            #[cfg(windows)]
            let status = std::process::ExitStatus::from_raw(self.code as u32);
            Ok(Output {
                status,
                stdout: self.stdout.as_bytes().to_vec(),
                stderr: b"moov atom not found\n".to_vec(),
            })
        }
    }

    fn prober(code: i32, stdout: &'static str) -> MediaProber {
        MediaProber::new(
            Arc::new(CannedProbe { code, stdout }),
            PathBuf::from("ffprobe"),
            &ProbeSection::default(),
        )
    }

    #[tokio::test]
    async fn reads_duration_and_format() {
        let meta = prober(
            0,
            r#"{"format":{"filename":"v.mp4","format_name":"mov,mp4,m4a,3gp,3g2,mj2","duration":"32.400000"}}"#,
        )
        .probe(Path::new("v.mp4"))
        .await
        .unwrap();
        assert_eq!(meta.duration_seconds, 32.4);
        assert_eq!(meta.format_name.as_deref(), Some("mov,mp4,m4a,3gp,3g2,mj2"));
        assert!(!meta.duration_estimated);
    }

    #[tokio::test]
    async fn missing_or_zero_duration_uses_fallback() {
        for body in [
            r#"{"format":{"format_name":"matroska,webm"}}"#,
            r#"{"format":{"format_name":"mp4","duration":"0.000000"}}"#,
            r#"{"format":{"duration":"N/A"}}"#,
            r#"{}"#,
        ] {
            let meta = prober(0, body).probe(Path::new("v.mp4")).await.unwrap();
            assert_eq!(meta.duration_seconds, 30.0, "body {body}");
            assert!(meta.duration_estimated);
        }
    }

    #[tokio::test]
    async fn unreadable_file_is_a_probe_error() {
        let err = prober(1, "").probe(Path::new("v.mp4")).await.unwrap_err();
        match err {
            ProbeError::Failed { stderr, .. } => assert_eq!(stderr, "moov atom not found"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_output_is_a_parse_error() {
        let err = prober(0, "not json").probe(Path::new("v.mp4")).await.unwrap_err();
        assert!(matches!(err, ProbeError::Parse(_)));
    }
}
