use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderValue, ORIGIN, REFERER};
use reqwest::redirect::Policy;
use reqwest::Client;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DownloadSection;
use crate::resolver::{MediaLocation, ResolvedMedia};
use crate::storage::remove_if_exists;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },
    #[error("download from {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("downloaded payload is {size} bytes (minimum {min}); likely a blocked or error response")]
    Undersized { size: u64, min: u64 },
    #[error("invalid media url {0}")]
    InvalidUrl(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type DownloadResult<T> = Result<T, DownloadError>;

/// A transient media file that passed size validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedMedia {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Builds the HTTP client shared by the fetcher and the resolution API.
pub fn build_http_client(section: &DownloadSection) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(section.user_agent.clone())
        .redirect(Policy::limited(section.max_redirects))
        .connect_timeout(section.connect_timeout())
        .build()
}

#[derive(Debug, Clone)]
pub struct MediaFetcher {
    client: Client,
    timeout: Duration,
    min_size_bytes: u64,
}

impl MediaFetcher {
    pub fn new(client: Client, section: &DownloadSection) -> Self {
        Self {
            client,
            timeout: section.timeout(),
            min_size_bytes: section.min_size_bytes,
        }
    }

    pub async fn download(&self, media: &ResolvedMedia, dest: &Path) -> DownloadResult<DownloadedMedia> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        match &media.location {
            MediaLocation::Local(path) => {
                if path != dest {
                    self.copy_file(path, dest).await?;
                }
            }
            MediaLocation::Remote(url) if url.scheme() == "file" => {
                let source = url
                    .to_file_path()
                    .map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
                self.copy_file(&source, dest).await?;
            }
            MediaLocation::Remote(url) if matches!(url.scheme(), "http" | "https") => {
                if let Err(err) = self.fetch_to_file(url, media.referer.as_deref(), dest).await {
                    if let Err(io) = remove_if_exists(dest).await {
                        warn!(path = %dest.display(), error = %io, "failed to remove partial download");
                    }
                    return Err(err);
                }
            }
            MediaLocation::Remote(url) => return Err(DownloadError::InvalidUrl(url.to_string())),
        }
        let downloaded = self.validate(dest).await?;
        info!(
            strategy = media.strategy,
            path = %downloaded.path.display(),
            size_bytes = downloaded.size_bytes,
            "media downloaded"
        );
        Ok(downloaded)
    }

    async fn fetch_to_file(&self, url: &Url, referer: Option<&str>, path: &Path) -> DownloadResult<()> {
        let mut request = self.client.get(url.clone()).timeout(self.timeout);
        if let Some(referer) = referer {
            if let Ok(value) = HeaderValue::from_str(referer) {
                request = request.header(REFERER, value);
            }
            if let Ok(origin) = Url::parse(referer) {
                let origin = origin.origin().ascii_serialization();
                if let Ok(value) = HeaderValue::from_str(&origin) {
                    request = request.header(ORIGIN, value);
                }
            }
        }
        let response = request
            .send()
            .await
            .map_err(|err| self.request_error(url, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(url = %url, final_url = %response.url(), "streaming media body");

        let mut file = fs::File::create(path)
            .await
            .map_err(|source| DownloadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let data = chunk.map_err(|err| self.request_error(url, err))?;
            file.write_all(&data)
                .await
                .map_err(|source| DownloadError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        file.flush().await.map_err(|source| DownloadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> DownloadResult<()> {
        fs::copy(from, to)
            .await
            .map(|_| ())
            .map_err(|source| DownloadError::Io {
                path: from.to_path_buf(),
                source,
            })
    }

    async fn validate(&self, path: &Path) -> DownloadResult<DownloadedMedia> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|source| DownloadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let size = metadata.len();
        if size < self.min_size_bytes {
            if let Err(err) = remove_if_exists(path).await {
                warn!(path = %path.display(), error = %err, "failed to remove undersized download");
            }
            return Err(DownloadError::Undersized {
                size,
                min: self.min_size_bytes,
            });
        }
        Ok(DownloadedMedia {
            path: path.to_path_buf(),
            size_bytes: size,
        })
    }

    fn request_error(&self, url: &Url, err: reqwest::Error) -> DownloadError {
        if err.is_timeout() {
            DownloadError::Timeout {
                url: url.to_string(),
                after: self.timeout,
            }
        } else {
            DownloadError::Request {
                url: url.to_string(),
                source: err,
            }
        }
    }
}
