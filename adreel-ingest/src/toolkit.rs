use std::env;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{DownloaderSection, ToolkitSection};
use crate::error::{ConfigError, Result};

/// Binary locations for the media toolkit and the optional external
/// downloader, resolved once when the pipeline is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaToolkit {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub downloader: Option<PathBuf>,
}

impl MediaToolkit {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            downloader: None,
        }
    }

    pub fn with_downloader(mut self, downloader: impl Into<PathBuf>) -> Self {
        self.downloader = Some(downloader.into());
        self
    }

    /// Looks up each binary as: explicit configured path, then `PATH`, then
    /// the configured fallback directories. ffmpeg and ffprobe are required;
    /// a missing downloader only disables that resolution strategy.
    pub fn discover(toolkit: &ToolkitSection, downloader: &DownloaderSection) -> Result<Self> {
        let ffmpeg = require("ffmpeg", toolkit.ffmpeg.as_deref(), &toolkit.fallback_dirs)?;
        let ffprobe = require("ffprobe", toolkit.ffprobe.as_deref(), &toolkit.fallback_dirs)?;
        let downloader = if downloader.enabled {
            locate(&downloader.binary, None, &toolkit.fallback_dirs)
        } else {
            None
        };
        match &downloader {
            Some(path) => info!(path = %path.display(), "external downloader available"),
            None => info!("external downloader unavailable, strategy disabled"),
        }
        Ok(Self {
            ffmpeg,
            ffprobe,
            downloader,
        })
    }
}

fn require(tool: &str, explicit: Option<&Path>, fallback_dirs: &[PathBuf]) -> Result<PathBuf> {
    locate(tool, explicit, fallback_dirs).ok_or_else(|| ConfigError::ToolMissing {
        tool: tool.to_string(),
        searched: search_dirs(fallback_dirs)
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(":"),
    })
}

/// `name` may itself be a path (`/opt/yt-dlp`), in which case it is only
/// checked for existence.
pub fn locate(name: &str, explicit: Option<&Path>, fallback_dirs: &[PathBuf]) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        debug!(tool = name, path = %path.display(), "configured path does not exist");
    }
    let as_path = Path::new(name);
    if as_path.components().count() > 1 {
        return as_path.is_file().then(|| as_path.to_path_buf());
    }
    let file_name = format!("{name}{}", env::consts::EXE_SUFFIX);
    search_dirs(fallback_dirs)
        .into_iter()
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

fn search_dirs(fallback_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).collect())
        .unwrap_or_default();
    for dir in fallback_dirs {
        if !dirs.contains(dir) {
            dirs.push(dir.clone());
        }
    }
    dirs
}
