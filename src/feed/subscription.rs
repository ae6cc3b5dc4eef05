//! Feed subscriptions and the feed list file.
//!
//! Two formats are accepted. OPML (detected by an `<opml` or `<outline`
//! tag) is parsed by [`parse_opml`](super::opml::parse_opml). Anything
//! else is the plain-text list: one feed per line, the URL followed by
//! whitespace-separated labels. Blank lines and lines starting with `#`
//! are ignored.

use std::path::Path;
use thiserror::Error;

use super::opml::parse_opml;
use crate::util::validate_url_with;

/// Maximum feed list size (4 MB).
const MAX_LIST_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FeedListError {
    #[error("Failed to read feed list: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feed list too large: {0} bytes")]
    TooLarge(u64),

    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),
}

/// One configured feed and the labels its items are tagged with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub url: String,
    pub labels: Vec<String>,
}

impl Subscription {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }
}

/// Read and parse the feed list at `path`.
pub async fn load_subscriptions(
    path: &Path,
    allow_private_hosts: bool,
) -> Result<Vec<Subscription>, FeedListError> {
    let meta = tokio::fs::metadata(path).await?;
    if meta.len() > MAX_LIST_SIZE {
        return Err(FeedListError::TooLarge(meta.len()));
    }
    let content = tokio::fs::read_to_string(path).await?;
    let subscriptions = parse_subscriptions(&content, allow_private_hosts)?;
    tracing::info!(
        path = %path.display(),
        feeds = subscriptions.len(),
        "Loaded feed list"
    );
    Ok(subscriptions)
}

/// Parse feed list content in either format.
pub fn parse_subscriptions(
    content: &str,
    allow_private_hosts: bool,
) -> Result<Vec<Subscription>, FeedListError> {
    if content.contains("<opml") || content.contains("<outline") {
        parse_opml(content, allow_private_hosts)
    } else {
        Ok(parse_text_list(content, allow_private_hosts))
    }
}

/// Parse the plain-text format. Invalid URLs are skipped with a warning.
pub fn parse_text_list(content: &str, allow_private_hosts: bool) -> Vec<Subscription> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let mut fields = line.split_whitespace();
            let url = fields.next()?;
            if let Err(e) = validate_url_with(url, allow_private_hosts) {
                tracing::warn!(line = index + 1, url = %url, error = %e, "Skipping invalid feed URL");
                return None;
            }
            Some(Subscription::new(url).with_labels(fields))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_text_list() {
        let content = "\
# news feeds
https://example.com/rss news tech

https://other.example.org/atom.xml
  https://third.example.net/feed   blog  \n";

        let subs = parse_text_list(content, false);
        assert_eq!(
            subs,
            vec![
                Subscription::new("https://example.com/rss").with_labels(["news", "tech"]),
                Subscription::new("https://other.example.org/atom.xml"),
                Subscription::new("https://third.example.net/feed").with_labels(["blog"]),
            ]
        );
    }

    #[test]
    fn test_text_list_skips_invalid_urls() {
        let content = "not-a-url label\nhttp://10.0.0.1/feed\nhttps://ok.example.com/rss\n";
        let subs = parse_text_list(content, false);
        assert_eq!(subs, vec![Subscription::new("https://ok.example.com/rss")]);

        let subs = parse_text_list(content, true);
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn test_format_detection() {
        let opml = r#"<opml version="2.0"><body><outline xmlUrl="https://a.example.com/rss"/></body></opml>"#;
        let subs = parse_subscriptions(opml, false).unwrap();
        assert_eq!(subs, vec![Subscription::new("https://a.example.com/rss")]);

        let text = "https://a.example.com/rss x";
        let subs = parse_subscriptions(text, false).unwrap();
        assert_eq!(subs[0].labels, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.txt");
        std::fs::write(&path, "https://example.com/rss a b\n").unwrap();

        let subs = load_subscriptions(&path, false).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].labels, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_subscriptions(&dir.path().join("absent.txt"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedListError::Io(_)));
    }
}
