mod direct;
mod downloader;
mod error;
mod hosted_api;
mod reference;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

pub use direct::DirectUrlStrategy;
pub use downloader::ExternalDownloaderStrategy;
pub use error::{ResolutionError, ResolutionResult, StrategyError, StrategyFailure};
pub use hosted_api::{pick_play_url, HostedApiResponse, HostedApiStrategy, PlayUrls};
pub use reference::{Platform, VideoReference};

/// Where the fetcher finds the media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaLocation {
    Remote(Url),
    /// Already on disk, written by a strategy that downloads by itself.
    Local(PathBuf),
}

impl fmt::Display for MediaLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaLocation::Remote(url) => f.write_str(url.as_str()),
            MediaLocation::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub location: MediaLocation,
    pub strategy: &'static str,
    pub referer: Option<String>,
}

/// Per-invocation inputs a strategy may need besides the reference.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    download_path: PathBuf,
}

impl ResolveContext {
    pub fn new(download_path: impl Into<PathBuf>) -> Self {
        Self {
            download_path: download_path.into(),
        }
    }

    /// Destination for strategies that download the media themselves.
    pub fn download_path(&self) -> &Path {
        &self.download_path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    Resolved(ResolvedMedia),
    NotApplicable,
}

#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(
        &self,
        reference: &VideoReference,
        context: &ResolveContext,
    ) -> Result<StrategyOutcome, StrategyError>;
}

/// Ordered chain of strategies; the first one that resolves wins.
#[derive(Clone)]
pub struct Resolver {
    strategies: Vec<Arc<dyn ResolutionStrategy>>,
}

impl Resolver {
    pub fn new(strategies: Vec<Arc<dyn ResolutionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn resolve(
        &self,
        reference: &VideoReference,
        context: &ResolveContext,
    ) -> ResolutionResult<ResolvedMedia> {
        self.resolve_from(0, reference, context).await
    }

    /// Continues the chain with the strategies after `strategy`, for when
    /// the media that strategy produced could not be fetched. An unknown
    /// name leaves nothing to try.
    pub async fn resolve_after(
        &self,
        strategy: &str,
        reference: &VideoReference,
        context: &ResolveContext,
    ) -> ResolutionResult<ResolvedMedia> {
        let start = self
            .strategies
            .iter()
            .position(|s| s.name() == strategy)
            .map_or(self.strategies.len(), |index| index + 1);
        self.resolve_from(start, reference, context).await
    }

    async fn resolve_from(
        &self,
        start: usize,
        reference: &VideoReference,
        context: &ResolveContext,
    ) -> ResolutionResult<ResolvedMedia> {
        let mut failures = Vec::new();
        for strategy in &self.strategies[start..] {
            match strategy.resolve(reference, context).await {
                Ok(StrategyOutcome::Resolved(media)) => {
                    info!(
                        strategy = strategy.name(),
                        platform = %reference.platform(),
                        location = %media.location,
                        "reference resolved"
                    );
                    return Ok(media);
                }
                Ok(StrategyOutcome::NotApplicable) => {
                    debug!(strategy = strategy.name(), "strategy not applicable");
                }
                Err(err) => {
                    warn!(strategy = strategy.name(), reference = %reference, error = %err, "resolution strategy failed");
                    failures.push(StrategyFailure {
                        strategy: strategy.name(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Err(ResolutionError::Exhausted {
            reference: reference.to_string(),
            failures,
        })
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        outcome: fn() -> Result<StrategyOutcome, StrategyError>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(
            name: &'static str,
            outcome: fn() -> Result<StrategyOutcome, StrategyError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ResolutionStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn resolve(
            &self,
            _reference: &VideoReference,
            _context: &ResolveContext,
        ) -> Result<StrategyOutcome, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn resolved() -> Result<StrategyOutcome, StrategyError> {
        Ok(StrategyOutcome::Resolved(ResolvedMedia {
            location: MediaLocation::Remote(Url::parse("https://cdn.example.com/v.mp4").unwrap()),
            strategy: "second",
            referer: None,
        }))
    }

    fn failing() -> Result<StrategyOutcome, StrategyError> {
        Err(StrategyError::NoUsableUrl)
    }

    fn skipped() -> Result<StrategyOutcome, StrategyError> {
        Ok(StrategyOutcome::NotApplicable)
    }

    fn chain(items: &[&Arc<Scripted>]) -> Resolver {
        Resolver::new(
            items
                .iter()
                .map(|item| Arc::clone(item) as Arc<dyn ResolutionStrategy>)
                .collect(),
        )
    }

    fn context() -> ResolveContext {
        ResolveContext::new("/tmp/video.mp4")
    }

    #[tokio::test]
    async fn falls_through_failures_in_order() {
        let first = Scripted::new("first", failing);
        let second = Scripted::new("second", resolved);
        let third = Scripted::new("third", resolved);
        let resolver = chain(&[&first, &second, &third]);
        let reference = VideoReference::parse("https://www.tiktok.com/@a/video/1").unwrap();

        let media = resolver.resolve(&reference, &context()).await.unwrap();
        assert_eq!(media.strategy, "second");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_failure() {
        let resolver = chain(&[
            &Scripted::new("api", failing),
            &Scripted::new("skip", skipped),
            &Scripted::new("tool", failing),
        ]);
        let reference = VideoReference::parse("https://v.douyin.com/abc/").unwrap();
        let err = resolver.resolve(&reference, &context()).await.unwrap_err();
        match &err {
            ResolutionError::Exhausted { failures, .. } => {
                let names: Vec<_> = failures.iter().map(|f| f.strategy).collect();
                assert_eq!(names, vec!["api", "tool"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("api: resolution api returned no usable play url"));
    }

    #[tokio::test]
    async fn nothing_applicable_is_still_an_error() {
        let resolver = chain(&[&Scripted::new("skip", skipped)]);
        let reference = VideoReference::parse("https://example.com/a.mp4").unwrap();
        let err = resolver.resolve(&reference, &context()).await.unwrap_err();
        assert!(err.to_string().ends_with("no applicable strategy"));
    }

    #[tokio::test]
    async fn resolve_after_skips_the_named_strategy_and_its_predecessors() {
        let first = Scripted::new("first", resolved);
        let second = Scripted::new("second", skipped);
        let third = Scripted::new("third", resolved);
        let resolver = chain(&[&first, &second, &third]);
        let reference = VideoReference::parse("https://www.tiktok.com/@a/video/1").unwrap();

        let media = resolver
            .resolve_after("first", &reference, &context())
            .await
            .unwrap();
        assert_eq!(media.strategy, "second");
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.calls.load(Ordering::SeqCst), 1);

        let err = resolver
            .resolve_after("third", &reference, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Exhausted { ref failures, .. } if failures.is_empty()));
        let err = resolver
            .resolve_after("missing", &reference, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Exhausted { .. }));
    }
}
