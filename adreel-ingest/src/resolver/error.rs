use std::path::PathBuf;

use thiserror::Error;

use crate::command::CommandError;

/// Failure of a single resolution strategy. Never fatal on its own.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("resolution request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("resolution api returned code {code}: {message}")]
    Api { code: i64, message: String },
    #[error("resolution api returned no usable play url")]
    NoUsableUrl,
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("downloader exited with status {status:?}: {stderr}")]
    ToolFailed { status: Option<i32>, stderr: String },
    #[error("downloader produced no output at {0}")]
    MissingOutput(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("invalid video reference {reference}: {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("all resolution strategies failed for {reference}: {}", summarize(.failures))]
    Exhausted {
        reference: String,
        failures: Vec<StrategyFailure>,
    },
}

fn summarize(failures: &[StrategyFailure]) -> String {
    if failures.is_empty() {
        return "no applicable strategy".to_string();
    }
    failures
        .iter()
        .map(|failure| format!("{}: {}", failure.strategy, failure.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ResolutionResult<T> = Result<T, ResolutionError>;
