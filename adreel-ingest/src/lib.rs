pub mod audio;
pub mod command;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod frames;
pub mod pipeline;
pub mod probe;
pub mod resolver;
pub mod sampler;
pub mod storage;
pub mod toolkit;

pub use audio::{AudioExtractionError, AudioExtractor};
pub use command::{CommandError, CommandExecutor, SystemCommandExecutor};
pub use config::{
    load_pipeline_config, AudioSection, DownloadSection, DownloaderSection, FramesSection,
    PipelineConfig, ProbeSection, ResolverSection, StorageSection, ToolkitSection,
};
pub use error::{ConfigError, Result};
pub use fetcher::{build_http_client, DownloadError, DownloadedMedia, MediaFetcher};
pub use frames::{FrameExtractor, NoFramesError, SeekMode};
pub use pipeline::{
    AudioTrack, ExtractionRequest, ExtractionResult, Frame, FramePipeline, PipelineBuilder,
    PipelineError, PipelineResult, PipelineStage,
};
pub use probe::{MediaMetadata, MediaProber, ProbeError};
pub use resolver::{
    MediaLocation, Platform, ResolutionError, ResolutionStrategy, ResolvedMedia, Resolver,
    StrategyError, StrategyOutcome, VideoReference,
};
pub use sampler::{sample_timestamps, SampleTimestamps, MAX_SAMPLES};
pub use storage::{InvocationScope, TransientStorage};
pub use toolkit::MediaToolkit;
pub use tokio_util::sync::CancellationToken;
