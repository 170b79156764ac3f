use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::error::StrategyError;
use super::reference::VideoReference;
use super::{MediaLocation, ResolveContext, ResolutionStrategy, ResolvedMedia, StrategyOutcome};

/// Envelope returned by the hosted resolution service.
#[derive(Debug, Clone, Deserialize)]
pub struct HostedApiResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<PlayUrls>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayUrls {
    #[serde(default)]
    pub play: Option<String>,
    #[serde(default)]
    pub hdplay: Option<String>,
    #[serde(default)]
    pub wmplay: Option<String>,
}

/// Picks the candidate to download: the standard `play` stream first, the HD
/// variant next (often HEVC, which not every decoder handles), the
/// watermarked stream last. Relative URLs are joined onto `base`.
pub fn pick_play_url(urls: &PlayUrls, base: &Url) -> Option<Url> {
    [&urls.play, &urls.hdplay, &urls.wmplay]
        .into_iter()
        .filter_map(|candidate| candidate.as_deref())
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| {
            base.join(candidate)
                .ok()
                .filter(|url| matches!(url.scheme(), "http" | "https"))
        })
}

/// Resolves known short-video page URLs through the hosted resolution API.
#[derive(Debug, Clone)]
pub struct HostedApiStrategy {
    client: Client,
    endpoint: Url,
    timeout: Duration,
    request_hd: bool,
}

impl HostedApiStrategy {
    pub const NAME: &'static str = "hosted_api";

    pub fn new(client: Client, endpoint: Url, timeout: Duration, request_hd: bool) -> Self {
        Self {
            client,
            endpoint,
            timeout,
            request_hd,
        }
    }
}

#[async_trait]
impl ResolutionStrategy for HostedApiStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn resolve(
        &self,
        reference: &VideoReference,
        _context: &ResolveContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        let platform = reference.platform();
        if !platform.is_known() {
            return Ok(StrategyOutcome::NotApplicable);
        }
        let page_url = reference.page_url();
        let hd = if self.request_hd { "1" } else { "0" };
        debug!(endpoint = %self.endpoint, page = %page_url, "querying resolution api");
        let response: HostedApiResponse = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .form(&[("url", page_url.as_str()), ("hd", hd)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if response.code != 0 {
            return Err(StrategyError::Api {
                code: response.code,
                message: response.msg.unwrap_or_default(),
            });
        }
        let urls = response.data.unwrap_or_default();
        let url = pick_play_url(&urls, &self.endpoint).ok_or(StrategyError::NoUsableUrl)?;
        Ok(StrategyOutcome::Resolved(ResolvedMedia {
            location: MediaLocation::Remote(url),
            strategy: Self::NAME,
            referer: platform.referer().map(str::to_string),
        }))
    }
}
