mod error;
mod types;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::audio::AudioExtractor;
use crate::command::{CommandExecutor, SystemCommandExecutor};
use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::fetcher::{build_http_client, DownloadedMedia, MediaFetcher};
use crate::frames::FrameExtractor;
use crate::probe::MediaProber;
use crate::resolver::{
    DirectUrlStrategy, ExternalDownloaderStrategy, HostedApiStrategy, MediaLocation,
    ResolutionStrategy, ResolveContext, ResolvedMedia, Resolver, VideoReference,
};
use crate::sampler::sample_timestamps;
use crate::storage::{InvocationScope, TransientStorage};
use crate::toolkit::MediaToolkit;

pub use error::{error_chain, PipelineError, PipelineResult};
pub use types::{
    AudioTrack, ExtractionRequest, ExtractionResult, Frame, PipelineStage, JPEG_MIME_TYPE,
};

/// Resolve → download → probe → sample → frames → audio, with every transient
/// file released on each exit path. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct FramePipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    storage: TransientStorage,
    resolver: Resolver,
    fetcher: MediaFetcher,
    prober: MediaProber,
    frames: FrameExtractor,
    audio: AudioExtractor,
    audio_extension: String,
    allow_local_files: bool,
    failure_log: Option<PathBuf>,
}

impl FramePipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn storage(&self) -> &TransientStorage {
        &self.inner.storage
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    pub async fn extract(&self, request: ExtractionRequest) -> PipelineResult<ExtractionResult> {
        self.extract_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Runs one invocation, aborting at the next await point once `cancel`
    /// fires. Transient files are removed before any error is returned.
    pub async fn extract_with_cancellation(
        &self,
        request: ExtractionRequest,
        cancel: CancellationToken,
    ) -> PipelineResult<ExtractionResult> {
        let scope = self.inner.storage.begin_invocation();
        info!(invocation = scope.id(), reference = %request.reference, "extraction started");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled { stage: scope.stage() }),
            result = self.run(&scope, &request) => result,
        };

        match outcome {
            Ok(result) => {
                scope.transfer_audio();
                scope.release_intermediates().await;
                scope.enter(PipelineStage::Done);
                info!(
                    invocation = scope.id(),
                    frames = result.frames.len(),
                    strategy = result.strategy,
                    duration_seconds = result.duration_seconds,
                    "extraction finished"
                );
                Ok(result)
            }
            Err(err) => {
                let stage = scope.stage();
                scope.discard().await;
                scope.enter(PipelineStage::Failed);
                error!(invocation = scope.id(), stage = %stage, error = %err, "extraction failed");
                self.record_failure(stage, scope.id(), &err).await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        scope: &InvocationScope,
        request: &ExtractionRequest,
    ) -> PipelineResult<ExtractionResult> {
        let inner = &self.inner;

        scope.enter(PipelineStage::Resolving);
        let reference = VideoReference::parse_with(&request.reference, inner.allow_local_files)?;
        let video_path = scope.video_path();
        let media = inner
            .resolver
            .resolve(&reference, &ResolveContext::new(&video_path))
            .await?;

        scope.enter(PipelineStage::Downloading);
        let (media, downloaded) = self.download(&reference, media, &video_path).await?;

        scope.enter(PipelineStage::Probing);
        let metadata = inner.prober.probe(&downloaded.path).await?;

        scope.enter(PipelineStage::Sampling);
        let timestamps =
            sample_timestamps(metadata.duration_seconds, request.timestamps.as_deref());
        info!(
            invocation = scope.id(),
            duration_seconds = metadata.duration_seconds,
            timestamps = ?timestamps.as_slice(),
            "sample points chosen"
        );

        scope.enter(PipelineStage::ExtractingFrames);
        let frames = inner
            .frames
            .extract_frames(&downloaded.path, &timestamps, scope)
            .await?;

        scope.enter(PipelineStage::ExtractingAudio);
        let audio_path = scope.audio_path(&inner.audio_extension);
        let audio = inner.audio.extract_audio(&downloaded.path, &audio_path).await?;

        Ok(ExtractionResult {
            invocation_id: scope.id().to_string(),
            frames,
            audio,
            duration_seconds: metadata.duration_seconds,
            duration_estimated: metadata.duration_estimated,
            format_name: metadata.format_name,
            strategy: media.strategy,
            completed_at: Utc::now(),
        })
    }

    /// Fetches `media`. A platform CDN may still refuse a URL the API handed
    /// out, so a failed remote fetch for a known platform hands over to the
    /// strategies after the one that produced it. The first download error
    /// stands when none of them yields a fetchable result.
    async fn download(
        &self,
        reference: &VideoReference,
        mut media: ResolvedMedia,
        video_path: &Path,
    ) -> PipelineResult<(ResolvedMedia, DownloadedMedia)> {
        let inner = &self.inner;
        let err = match inner.fetcher.download(&media, video_path).await {
            Ok(downloaded) => return Ok((media, downloaded)),
            Err(err) => err,
        };
        let remote = matches!(media.location, MediaLocation::Remote(_));
        if !remote || !reference.platform().is_known() {
            return Err(err.into());
        }
        warn!(
            strategy = media.strategy,
            reference = %reference,
            error = %err,
            "download failed, trying the remaining strategies"
        );
        loop {
            media = match inner
                .resolver
                .resolve_after(media.strategy, reference, &ResolveContext::new(video_path))
                .await
            {
                Ok(next) => next,
                Err(resolution) => {
                    debug!(error = %resolution, "no remaining strategy produced media");
                    return Err(err.into());
                }
            };
            match inner.fetcher.download(&media, video_path).await {
                Ok(downloaded) => return Ok((media, downloaded)),
                Err(retry) => {
                    warn!(strategy = media.strategy, error = %retry, "fallback download failed");
                    if !matches!(media.location, MediaLocation::Remote(_)) {
                        return Err(err.into());
                    }
                }
            }
        }
    }

    async fn record_failure(&self, stage: PipelineStage, invocation: &str, err: &PipelineError) {
        let Some(path) = &self.inner.failure_log else {
            return;
        };
        let line = format!(
            "{} [{}] {} {}\n",
            Utc::now().to_rfc3339(),
            stage,
            invocation,
            error_chain(err)
        );
        if let Some(parent) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %err, "failed to create failure log directory");
                return;
            }
        }
        let written = match OpenOptions::new().create(true).append(true).open(path).await {
            Ok(mut file) => file.write_all(line.as_bytes()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            warn!(path = %path.display(), error = %err, "failed to append failure log");
        }
    }
}

impl fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePipeline")
            .field("work_dir", &self.inner.storage.root())
            .field("resolver", &self.inner.resolver)
            .field("failure_log", &self.inner.failure_log)
            .finish()
    }
}

/// Assembles a [`FramePipeline`]. Anything not supplied is derived from the
/// configuration: the toolkit is discovered on the host, subprocesses run
/// through [`SystemCommandExecutor`], and the resolver chain is
/// hosted API → external downloader → direct URL.
pub struct PipelineBuilder {
    config: PipelineConfig,
    toolkit: Option<MediaToolkit>,
    executor: Option<Arc<dyn CommandExecutor>>,
    strategies: Option<Vec<Arc<dyn ResolutionStrategy>>>,
    client: Option<Client>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            toolkit: None,
            executor: None,
            strategies: None,
            client: None,
        }
    }

    pub fn toolkit(mut self, toolkit: MediaToolkit) -> Self {
        self.toolkit = Some(toolkit);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn strategies(mut self, strategies: Vec<Arc<dyn ResolutionStrategy>>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn http_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub async fn build(self) -> PipelineResult<FramePipeline> {
        let config = self.config;
        config.validate()?;

        let toolkit = match self.toolkit {
            Some(toolkit) => toolkit,
            None => MediaToolkit::discover(&config.toolkit, &config.downloader)?,
        };
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SystemCommandExecutor) as Arc<dyn CommandExecutor>);
        let client = match self.client {
            Some(client) => client,
            None => build_http_client(&config.download).map_err(PipelineError::HttpClient)?,
        };
        let strategies = match self.strategies {
            Some(strategies) => strategies,
            None => default_strategies(&config, &toolkit, &client, &executor)?,
        };
        let storage = TransientStorage::open(&config.storage.work_dir)
            .await
            .map_err(|source| PipelineError::Storage {
                path: config.storage.work_dir.clone(),
                source,
            })?;
        let resolver = Resolver::new(strategies);
        info!(
            work_dir = %storage.root().display(),
            strategies = ?resolver.strategy_names(),
            ffmpeg = %toolkit.ffmpeg.display(),
            "frame pipeline ready"
        );

        Ok(FramePipeline {
            inner: Arc::new(PipelineInner {
                resolver,
                fetcher: MediaFetcher::new(client, &config.download),
                prober: MediaProber::new(
                    Arc::clone(&executor),
                    toolkit.ffprobe.clone(),
                    &config.probe,
                ),
                frames: FrameExtractor::new(
                    Arc::clone(&executor),
                    toolkit.ffmpeg.clone(),
                    &config.frames,
                ),
                audio: AudioExtractor::new(executor, toolkit.ffmpeg.clone(), &config.audio),
                audio_extension: config.audio.extension.clone(),
                allow_local_files: config.resolver.allow_local_files,
                failure_log: config.storage.failure_log.clone(),
                storage,
            }),
        })
    }
}

fn default_strategies(
    config: &PipelineConfig,
    toolkit: &MediaToolkit,
    client: &Client,
    executor: &Arc<dyn CommandExecutor>,
) -> PipelineResult<Vec<Arc<dyn ResolutionStrategy>>> {
    let endpoint = Url::parse(&config.resolver.api_endpoint).map_err(|err| {
        ConfigError::Invalid(format!(
            "resolver.api_endpoint {:?}: {err}",
            config.resolver.api_endpoint
        ))
    })?;
    let hosted: Arc<dyn ResolutionStrategy> = Arc::new(HostedApiStrategy::new(
        client.clone(),
        endpoint,
        config.resolver.api_timeout(),
        config.resolver.request_hd,
    ));
    let downloader: Arc<dyn ResolutionStrategy> = Arc::new(ExternalDownloaderStrategy::new(
        Arc::clone(executor),
        toolkit.downloader.clone(),
        config.downloader.format.clone(),
        config.downloader.timeout(),
    ));
    let direct: Arc<dyn ResolutionStrategy> = Arc::new(DirectUrlStrategy);
    Ok(vec![hosted, downloader, direct])
}
