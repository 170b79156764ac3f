use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::command::{run_with_timeout, stderr_tail, CommandError, CommandExecutor};
use crate::storage::remove_if_exists;

use super::error::StrategyError;
use super::reference::VideoReference;
use super::{MediaLocation, ResolveContext, ResolutionStrategy, ResolvedMedia, StrategyOutcome};

/// Fallback for known platforms: lets a general-purpose downloader (yt-dlp)
/// fetch the page's video straight into transient storage.
pub struct ExternalDownloaderStrategy {
    executor: Arc<dyn CommandExecutor>,
    binary: Option<PathBuf>,
    format: String,
    timeout: Duration,
}

impl ExternalDownloaderStrategy {
    pub const NAME: &'static str = "external_downloader";

    /// `binary` is `None` when the tool was not found at startup; the
    /// strategy then reports itself as not applicable.
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        binary: Option<PathBuf>,
        format: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            binary,
            format: format.into(),
            timeout,
        }
    }

    fn build_args(&self, reference: &VideoReference, dest: &Path) -> Vec<OsString> {
        vec![
            "-q".into(),
            "--no-playlist".into(),
            "--no-part".into(),
            "--no-continue".into(),
            "-f".into(),
            self.format.clone().into(),
            "-o".into(),
            dest.as_os_str().to_os_string(),
            "--".into(),
            reference.as_str().into(),
        ]
    }
}

impl fmt::Debug for ExternalDownloaderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalDownloaderStrategy")
            .field("binary", &self.binary)
            .field("format", &self.format)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl ResolutionStrategy for ExternalDownloaderStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn resolve(
        &self,
        reference: &VideoReference,
        context: &ResolveContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        if !reference.platform().is_known() {
            return Ok(StrategyOutcome::NotApplicable);
        }
        let Some(binary) = &self.binary else {
            debug!("no external downloader configured");
            return Ok(StrategyOutcome::NotApplicable);
        };
        let dest = context.download_path();
        let args = self.build_args(reference, dest);
        let output = match run_with_timeout(self.executor.as_ref(), binary, &args, self.timeout)
            .await
        {
            Ok(output) => output,
            Err(CommandError::NotFound { program }) => {
                info!(program = %program.display(), "external downloader missing, skipping");
                return Ok(StrategyOutcome::NotApplicable);
            }
            Err(err) => {
                discard_partial(dest).await;
                return Err(err.into());
            }
        };
        if !output.status.success() {
            discard_partial(dest).await;
            return Err(StrategyError::ToolFailed {
                status: output.status.code(),
                stderr: stderr_tail(&output),
            });
        }
        match fs::metadata(dest).await {
            Ok(meta) if meta.len() > 0 => Ok(StrategyOutcome::Resolved(ResolvedMedia {
                location: MediaLocation::Local(dest.to_path_buf()),
                strategy: Self::NAME,
                referer: None,
            })),
            _ => {
                discard_partial(dest).await;
                Err(StrategyError::MissingOutput(dest.to_path_buf()))
            }
        }
    }
}

async fn discard_partial(dest: &Path) {
    if let Err(err) = remove_if_exists(dest).await {
        warn!(path = %dest.display(), error = %err, "failed to remove partial download");
    }
}
