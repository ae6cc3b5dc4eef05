use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH, LOCATION};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::parser::parse_entries;
use super::source::{FeedResponse, FeedSource, Page, PageFetch, PageSource, Validators};
use crate::config::Config;
use crate::util::validate_url_with;

/// Errors that can occur while retrieving a feed or a page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(String),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with an error status (pages only; feeds report the status)
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// URL is malformed, not HTTP(S), or points at a blocked host
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Too many redirects (max {0})")]
    TooManyRedirects(usize),
    #[error("Redirect loop detected at {0}")]
    RedirectLoop(String),
    /// A redirect's `Location` is malformed or points at a blocked host
    #[error("Bad redirect target: {0}")]
    BadRedirect(String),
}

impl FetchError {
    /// No HTTP response was obtained at all: the host is unreachable as far
    /// as this run can tell.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Timeout | FetchError::InvalidUrl(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// One HTTP exchange after retries: status, headers and (for 2xx) the body.
struct Exchange {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Final response of a redirect chain.
struct Resolved {
    exchange: Exchange,
    url: Url,
    first_redirect: Option<StatusCode>,
}

/// HTTP implementation of [`FeedSource`] and [`PageSource`].
///
/// Redirects are followed by hand so that a permanent redirect at the start
/// of the chain can be reported to the caller.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    retry_base_delay: Duration,
    max_redirects: usize,
    max_feed_bytes: usize,
    max_page_bytes: usize,
    allow_private_hosts: bool,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_secs(2),
            max_redirects: config.max_redirects,
            max_feed_bytes: config.max_feed_bytes,
            max_page_bytes: config.max_page_bytes,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    /// Delay before the first retry; doubles on each further attempt.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    fn check_url(&self, raw: &str) -> Result<Url, FetchError> {
        validate_url_with(raw, self.allow_private_hosts)
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))
    }

    async fn backoff(&self, retry_count: u32) {
        let delay = self.retry_base_delay.saturating_mul(2u32.saturating_pow(retry_count));
        tokio::time::sleep(delay).await;
    }

    /// Follow redirects from `url` until a non-redirect response.
    async fn resolve(
        &self,
        url: &str,
        hints: &Validators,
        limit: usize,
    ) -> Result<Resolved, FetchError> {
        let mut current = self.check_url(url)?;
        let mut visited: Vec<Url> = Vec::new();
        let mut first_redirect = None;

        loop {
            let exchange = self.send_with_retries(&current, hints, limit).await?;
            let status = exchange.status;

            let location = exchange
                .headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let location = match location {
                Some(loc) if status.is_redirection() && status != StatusCode::NOT_MODIFIED => loc,
                _ => {
                    return Ok(Resolved {
                        exchange,
                        url: current,
                        first_redirect,
                    })
                }
            };

            if visited.len() >= self.max_redirects {
                return Err(FetchError::TooManyRedirects(self.max_redirects));
            }
            let next = current
                .join(&location)
                .map_err(|e| FetchError::BadRedirect(format!("{}: {}", location, e)))?;
            if next == current || visited.contains(&next) {
                return Err(FetchError::RedirectLoop(next.to_string()));
            }

            tracing::debug!(
                from = %current,
                to = %next,
                status = status.as_u16(),
                hop = visited.len() + 1,
                "Following redirect"
            );

            first_redirect.get_or_insert(status);
            visited.push(current);
            current = validate_url_with(next.as_str(), self.allow_private_hosts)
                .map_err(|e| FetchError::BadRedirect(format!("{}: {}", next, e)))?;
        }
    }

    async fn send_with_retries(
        &self,
        url: &Url,
        hints: &Validators,
        limit: usize,
    ) -> Result<Exchange, FetchError> {
        let mut retry_count = 0;

        loop {
            let mut request = self.client.get(url.clone());
            if let Some(etag) = &hints.etag {
                request = request.header(IF_NONE_MATCH, etag.as_str());
            }
            if let Some(last_modified) = &hints.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified.as_str());
            }
            let response = request.send().await?;
            let status = response.status();

            // EDGE-004: 429 and 5xx back off exponentially
            if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
                && retry_count < self.max_retries
            {
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    "Retryable status, backing off"
                );
                self.backoff(retry_count).await;
                retry_count += 1;
                continue;
            }

            let headers = response.headers().clone();
            if !status.is_success() {
                return Ok(Exchange {
                    status,
                    headers,
                    body: Vec::new(),
                });
            }

            match read_limited_bytes(response, limit).await {
                Ok(body) => {
                    return Ok(Exchange {
                        status,
                        headers,
                        body,
                    })
                }
                // EDGE-005: Handle incomplete downloads with retry
                Err(FetchError::IncompleteResponse { expected, received })
                    if retry_count < self.max_retries =>
                {
                    tracing::debug!(
                        url = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    self.backoff(retry_count).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl FeedSource for HttpFetcher {
    async fn fetch_feed(&self, url: &str, hints: &Validators) -> Result<FeedResponse, FetchError> {
        let Resolved {
            exchange,
            url: final_url,
            first_redirect,
        } = self.resolve(url, hints, self.max_feed_bytes).await?;

        let entries = if exchange.status.is_success() {
            parse_entries(&exchange.body).map_err(|e| FetchError::Parse(e.to_string()))?
        } else {
            Vec::new()
        };

        Ok(FeedResponse {
            status: exchange.status.as_u16(),
            redirect_status: first_redirect.map(|s| s.as_u16()),
            href: final_url.to_string(),
            validators: Validators::from_headers(&exchange.headers),
            entries,
        })
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch_page(&self, url: &str, hints: &Validators) -> Result<PageFetch, FetchError> {
        let Resolved { exchange, .. } = self.resolve(url, hints, self.max_page_bytes).await?;
        let status = exchange.status;

        match status {
            StatusCode::NOT_MODIFIED => Ok(PageFetch::NotModified),
            status if status.is_success() => Ok(PageFetch::Fetched(Page {
                validators: Validators::from_headers(&exchange.headers),
                body: exchange.body,
            })),
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited(self.max_retries)),
            status => Err(FetchError::HttpStatus(status.as_u16())),
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
