//! Retrieval interfaces the engine consumes.
//!
//! [`HttpFetcher`](super::HttpFetcher) implements both traits over HTTP;
//! tests substitute in-memory sources.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ETAG, LAST_MODIFIED};

use super::fetcher::FetchError;

/// Revalidation hints sent with a conditional request and returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

impl Validators {
    /// `ETag` and `Last-Modified` from response headers; unreadable values are ignored.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            last_modified: read(LAST_MODIFIED),
            etag: read(ETAG),
        }
    }
}

/// One entry of a parsed feed. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    /// Primary (alternate) link.
    pub link: Option<String>,
    /// Every link the entry carries, in document order.
    pub links: Vec<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// Outcome of a feed request that produced an HTTP response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedResponse {
    /// Status of the last response in the redirect chain.
    pub status: u16,
    /// Status of the first response when the request was redirected.
    pub redirect_status: Option<u16>,
    /// URL the last response came from.
    pub href: String,
    pub validators: Validators,
    /// Empty unless the status is 2xx.
    pub entries: Vec<FeedEntry>,
}

impl FeedResponse {
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    /// New location when the chain started with 301/308 and did not end in an error.
    pub fn permanent_redirect(&self) -> Option<&str> {
        match self.redirect_status {
            Some(301) | Some(308) if self.status < 400 => Some(&self.href),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub body: Vec<u8>,
    pub validators: Validators,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageFetch {
    Fetched(Page),
    NotModified,
}

/// Conditional feed retrieval.
///
/// `Err` means no usable response: network failures (see
/// [`FetchError::is_network_failure`]) or a body that could not be read or
/// parsed. HTTP error statuses come back as `Ok` with the status set.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_feed(&self, url: &str, hints: &Validators) -> Result<FeedResponse, FetchError>;
}

/// Conditional page retrieval. HTTP error statuses are errors here.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str, hints: &Validators) -> Result<PageFetch, FetchError>;
}
