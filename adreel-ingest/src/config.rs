use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageSection,
    pub resolver: ResolverSection,
    pub downloader: DownloaderSection,
    pub download: DownloadSection,
    pub toolkit: ToolkitSection,
    pub probe: ProbeSection,
    pub frames: FramesSection,
    pub audio: AudioSection,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.download.max_redirects == 0 {
            return Err(ConfigError::Invalid(
                "download.max_redirects must be greater than zero".into(),
            ));
        }
        let fallback = self.probe.fallback_duration_seconds;
        if !fallback.is_finite() || fallback <= 0.0 {
            return Err(ConfigError::Invalid(
                "probe.fallback_duration_seconds must be positive".into(),
            ));
        }
        if self.audio.extension.trim().is_empty() {
            return Err(ConfigError::Invalid("audio.extension is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub work_dir: PathBuf,
    pub failure_log: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("adreel-ingest"),
            failure_log: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverSection {
    pub api_endpoint: String,
    pub api_timeout_seconds: u64,
    pub request_hd: bool,
    /// Accept `file://` references. Only for trusted callers.
    pub allow_local_files: bool,
}

impl ResolverSection {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_seconds)
    }
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            api_endpoint: "https://www.tikwm.com/api/".into(),
            api_timeout_seconds: 15,
            request_hd: true,
            allow_local_files: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloaderSection {
    pub enabled: bool,
    pub binary: String,
    pub format: String,
    pub timeout_seconds: u64,
}

impl DownloaderSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for DownloaderSection {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: "yt-dlp".into(),
            format: "mp4/best".into(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub max_redirects: usize,
    pub min_size_bytes: u64,
}

impl DownloadSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.into(),
            timeout_seconds: 60,
            connect_timeout_seconds: 10,
            max_redirects: 10,
            min_size_bytes: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolkitSection {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub fallback_dirs: Vec<PathBuf>,
}

impl Default for ToolkitSection {
    fn default() -> Self {
        Self {
            ffmpeg: None,
            ffprobe: None,
            fallback_dirs: vec![
                PathBuf::from("/usr/bin"),
                PathBuf::from("/usr/local/bin"),
                PathBuf::from("/opt/homebrew/bin"),
                PathBuf::from("/opt/local/bin"),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub timeout_seconds: u64,
    pub fallback_duration_seconds: f64,
}

impl ProbeSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            fallback_duration_seconds: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FramesSection {
    pub timeout_seconds: u64,
    pub jpeg_quality: u8,
    pub max_width: Option<u32>,
}

impl FramesSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for FramesSection {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            jpeg_quality: 2,
            max_width: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    pub codec: String,
    pub extension: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub bitrate: String,
    pub timeout_seconds: u64,
}

impl AudioSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            codec: "libmp3lame".into(),
            extension: "mp3".into(),
            sample_rate: 16_000,
            channels: 1,
            bitrate: "64k".into(),
            timeout_seconds: 120,
        }
    }
}

pub fn load_pipeline_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let config: PipelineConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
