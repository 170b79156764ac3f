#![allow(dead_code)]

use std::collections::HashSet;
use std::ffi::OsString;
use std::net::SocketAddr;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use adreel_ingest::{load_pipeline_config, CommandExecutor, MediaToolkit, PipelineConfig};

pub const JPEG_BYTES: [u8; 4] = [0xff, 0xd8, 0xff, 0xd9];

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(relative)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("adreel_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Fixture config rewired onto a temp directory.
pub fn test_config(base: &TempDir) -> PipelineConfig {
    let mut config = load_pipeline_config(fixture_path("configs/pipeline.toml")).unwrap();
    config.storage.work_dir = base.path().join("work");
    config.storage.failure_log = Some(base.path().join("logs").join("failures.log"));
    config.download.timeout_seconds = 5;
    config.resolver.api_timeout_seconds = 5;
    config.resolver.allow_local_files = true;
    config
}

pub fn fake_toolkit() -> MediaToolkit {
    MediaToolkit::new("/opt/media/ffmpeg", "/opt/media/ffprobe")
}

/// A source video outside the work directory, big enough to pass size
/// validation.
pub fn write_source_video(base: &TempDir) -> PathBuf {
    let dir = base.path().join("source");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("ad.mp4");
    std::fs::write(&path, vec![0x42u8; 8 * 1024]).unwrap();
    path
}

pub fn file_reference(path: &Path) -> String {
    url::Url::from_file_path(path).unwrap().to_string()
}

pub fn work_dir_entries(base: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(base.path().join("work"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn exit(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

/// Stands in for ffprobe/ffmpeg/yt-dlp. ffprobe answers with `duration`;
/// ffmpeg writes a JPEG (or audio) to its last argument unless told to fail;
/// yt-dlp writes a video to its `-o` path.
pub struct ScriptedMedia {
    pub duration: Option<f64>,
    pub failing_timestamps: HashSet<u32>,
    pub audio_fails: bool,
    /// Signalled when ffprobe starts; ffprobe then hangs until killed.
    pub hang_in_probe: Option<Arc<Notify>>,
    pub calls: Mutex<Vec<Vec<String>>>,
    /// References yt-dlp was asked to fetch.
    pub downloads: Mutex<Vec<String>>,
}

impl ScriptedMedia {
    pub fn new(duration: f64) -> Self {
        Self {
            duration: Some(duration),
            failing_timestamps: HashSet::new(),
            audio_fails: false,
            hang_in_probe: None,
            calls: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_at(mut self, timestamps: &[u32]) -> Self {
        self.failing_timestamps.extend(timestamps);
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.audio_fails = true;
        self
    }

    pub fn hanging_in_probe(mut self, started: Arc<Notify>) -> Self {
        self.hang_in_probe = Some(started);
        self
    }

    /// Timestamps ffmpeg was asked to seek to, in call order.
    pub fn seeks(&self) -> Vec<u32> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|args| {
                let index = args.iter().position(|arg| arg == "-ss")?;
                args[index + 1].parse().ok()
            })
            .collect()
    }

    async fn probe(&self) -> Output {
        if let Some(started) = &self.hang_in_probe {
            started.notify_one();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let format = match self.duration {
            Some(duration) => format!(r#"{{"format_name":"mov,mp4,m4a,3gp,3g2,mj2","duration":"{duration:.6}"}}"#),
            None => r#"{"format_name":"mov,mp4,m4a,3gp,3g2,mj2"}"#.to_string(),
        };
        Output {
            status: exit(0),
            stdout: format!(r#"{{"format":{format}}}"#).into_bytes(),
            stderr: Vec::new(),
        }
    }

    fn downloader(&self, args: &[String]) -> std::io::Result<Output> {
        self.downloads
            .lock()
            .unwrap()
            .push(args.last().cloned().unwrap_or_default());
        let out = args.iter().position(|arg| arg == "-o").unwrap() + 1;
        std::fs::write(&args[out], vec![0x42u8; 8 * 1024])?;
        Ok(Output {
            status: exit(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    fn ffmpeg(&self, args: &[String]) -> std::io::Result<Output> {
        let out = PathBuf::from(args.last().cloned().unwrap_or_default());
        let audio = args.iter().any(|arg| arg == "-vn");
        let failed = if audio {
            self.audio_fails
        } else {
            let index = args.iter().position(|arg| arg == "-ss").unwrap();
            let timestamp: u32 = args[index + 1].parse().unwrap();
            self.failing_timestamps.contains(&timestamp)
        };
        if failed {
            // ffmpeg often leaves a truncated file behind.
            std::fs::write(&out, b"")?;
            return Ok(Output {
                status: exit(1),
                stdout: Vec::new(),
                stderr: b"Conversion failed!\n".to_vec(),
            });
        }
        if audio {
            std::fs::write(&out, b"ID3\x04\x00audio")?;
        } else {
            std::fs::write(&out, JPEG_BYTES)?;
        }
        Ok(Output {
            status: exit(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

#[async_trait]
impl CommandExecutor for ScriptedMedia {
    async fn run(&self, program: &Path, args: &[OsString]) -> std::io::Result<Output> {
        let args: Vec<String> = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        self.calls.lock().unwrap().push(args.clone());
        match program.file_name().and_then(|name| name.to_str()) {
            Some("ffprobe") => Ok(self.probe().await),
            Some("ffmpeg") => self.ffmpeg(&args),
            Some("yt-dlp") => self.downloader(&args),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "unexpected program",
            )),
        }
    }
}

/// Serves `router` on an ephemeral local port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
