use std::fmt;

use url::Url;

use super::error::ResolutionError;

/// Short-video platforms whose page URLs need resolving before download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Douyin,
    TikTok,
    Other,
}

impl Platform {
    pub fn from_host(host: &str) -> Self {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let under = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));
        if under("douyin.com") || under("iesdouyin.com") {
            Platform::Douyin
        } else if under("tiktok.com") {
            Platform::TikTok
        } else {
            Platform::Other
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, Platform::Other)
    }

    /// Referer expected by the platform CDN.
    pub fn referer(self) -> Option<&'static str> {
        match self {
            Platform::Douyin => Some("https://www.douyin.com/"),
            Platform::TikTok => Some("https://www.tiktok.com/"),
            Platform::Other => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Platform::Douyin => "douyin",
            Platform::TikTok => "tiktok",
            Platform::Other => "other",
        };
        f.write_str(label)
    }
}

/// Caller-supplied video locator, parsed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoReference {
    raw: String,
    url: Url,
    platform: Platform,
}

impl VideoReference {
    /// Accepts http(s) references only.
    pub fn parse(raw: &str) -> Result<Self, ResolutionError> {
        Self::parse_with(raw, false)
    }

    /// Like [`parse`](Self::parse), additionally accepting `file://` URLs
    /// when `allow_local_files` is set. Local files must stay off for
    /// references that come from untrusted callers.
    pub fn parse_with(raw: &str, allow_local_files: bool) -> Result<Self, ResolutionError> {
        let trimmed = raw.trim();
        let invalid = |reason: String| ResolutionError::InvalidReference {
            reference: trimmed.to_string(),
            reason,
        };
        let url = Url::parse(trimmed).map_err(|err| invalid(err.to_string()))?;
        let platform = match url.scheme() {
            "http" | "https" => url.host_str().map(Platform::from_host).unwrap_or(Platform::Other),
            "file" if allow_local_files => Platform::Other,
            "file" => return Err(invalid("local file references are disabled".into())),
            other => return Err(invalid(format!("unsupported scheme {other}"))),
        };
        Ok(Self {
            raw: trimmed.to_string(),
            url,
            platform,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Page URL without query string or fragment. Share links carry tracking
    /// parameters that the resolution API rejects.
    pub fn page_url(&self) -> Url {
        let mut cleaned = self.url.clone();
        cleaned.set_query(None);
        cleaned.set_fragment(None);
        cleaned
    }
}

impl fmt::Display for VideoReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_platforms_by_domain() {
        assert_eq!(Platform::from_host("www.douyin.com"), Platform::Douyin);
        assert_eq!(Platform::from_host("v.douyin.com"), Platform::Douyin);
        assert_eq!(Platform::from_host("www.iesdouyin.com"), Platform::Douyin);
        assert_eq!(Platform::from_host("vm.tiktok.com"), Platform::TikTok);
        assert_eq!(Platform::from_host("TikTok.com"), Platform::TikTok);
        assert_eq!(Platform::from_host("nottiktok.com"), Platform::Other);
        assert_eq!(Platform::from_host("cdn.example.com"), Platform::Other);
    }

    #[test]
    fn page_url_drops_tracking_parameters() {
        let reference = VideoReference::parse(
            " https://www.tiktok.com/@brand/video/7312?is_from_webapp=1&sender_device=pc#top ",
        )
        .unwrap();
        assert_eq!(reference.platform(), Platform::TikTok);
        assert_eq!(
            reference.page_url().as_str(),
            "https://www.tiktok.com/@brand/video/7312"
        );
        assert_eq!(
            reference.as_str(),
            "https://www.tiktok.com/@brand/video/7312?is_from_webapp=1&sender_device=pc#top"
        );
    }

    #[test]
    fn file_urls_need_local_files_enabled() {
        let err = VideoReference::parse("file:///etc/passwd").unwrap_err();
        match err {
            ResolutionError::InvalidReference { reason, .. } => {
                assert_eq!(reason, "local file references are disabled")
            }
            other => panic!("unexpected {other:?}"),
        }

        let reference = VideoReference::parse_with("file:///tmp/clip.mp4", true).unwrap();
        assert_eq!(reference.platform(), Platform::Other);
        assert_eq!(reference.platform().referer(), None);
    }

    #[test]
    fn rejects_garbage_and_odd_schemes() {
        assert!(matches!(
            VideoReference::parse("not a url"),
            Err(ResolutionError::InvalidReference { .. })
        ));
        assert!(matches!(
            VideoReference::parse("ftp://example.com/clip.mp4"),
            Err(ResolutionError::InvalidReference { .. })
        ));
    }
}
