use std::path::PathBuf;

use thiserror::Error;

use crate::audio::AudioExtractionError;
use crate::error::ConfigError;
use crate::fetcher::DownloadError;
use crate::frames::NoFramesError;
use crate::probe::ProbeError;
use crate::resolver::ResolutionError;

use super::types::PipelineStage;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    NoFrames(#[from] NoFramesError),
    #[error("audio extraction failed: {0}")]
    Audio(#[from] AudioExtractionError),
    #[error("invocation cancelled while {stage}")]
    Cancelled { stage: PipelineStage },
    #[error("transient storage unavailable at {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("http client setup failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl PipelineError {
    /// Stage the invocation was in when this error ended it. Setup errors
    /// report `Failed` since no invocation was running.
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Resolution(_) => PipelineStage::Resolving,
            PipelineError::Download(_) => PipelineStage::Downloading,
            PipelineError::Probe(_) => PipelineStage::Probing,
            PipelineError::NoFrames(_) => PipelineStage::ExtractingFrames,
            PipelineError::Audio(_) => PipelineStage::ExtractingAudio,
            PipelineError::Cancelled { stage } => *stage,
            PipelineError::Storage { .. }
            | PipelineError::Config(_)
            | PipelineError::HttpClient(_) => PipelineStage::Failed,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// The error message followed by every `source()` in its chain.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
