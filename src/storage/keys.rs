//! Content-addressed keys: feed identities and item IDs.

use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use super::types::Namespace;

/// Namespace of the merged, pool-level store.
pub const POOL_NAMESPACE: &str = "merged";

/// Stable identity of a feed, derived from the URL it was configured with.
///
/// Redirects never change it: a feed keeps its namespace after the server
/// hands out a corrected URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedIdentity(String);

impl FeedIdentity {
    pub fn from_url(source_url: &str) -> Self {
        Self(sha256_hex(source_url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::trusted(self.0.clone())
    }
}

impl fmt::Display for FeedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

/// Canonical, percent-encoded form of a page URL.
///
/// Returns `None` for anything that cannot be fetched over HTTP(S).
pub fn canonical_page_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = Url::parse(trimmed).ok()?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(url.to_string()),
        _ => None,
    }
}

/// Item key for an already-canonical page URL.
pub fn item_id(canonical_url: &str) -> String {
    sha256_hex(canonical_url)
}

fn sha256_hex(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identity_is_stable_and_hex() {
        let a = FeedIdentity::from_url("https://example.com/rss");
        let b = FeedIdentity::from_url("https://example.com/rss");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_differs_per_url() {
        let a = FeedIdentity::from_url("https://example.com/rss");
        let b = FeedIdentity::from_url("https://example.com/atom");
        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_namespace_matches_digest() {
        let id = FeedIdentity::from_url("https://example.com/rss");
        assert_eq!(id.namespace().as_str(), id.as_str());
    }

    #[test]
    fn test_canonical_url_percent_encodes_path() {
        let url = canonical_page_url("https://example.com/a page/é").unwrap();
        assert_eq!(url, "https://example.com/a%20page/%C3%A9");
    }

    #[test]
    fn test_canonical_url_rejects_unfetchable() {
        assert!(canonical_page_url("").is_none());
        assert!(canonical_page_url("   ").is_none());
        assert!(canonical_page_url("not a url").is_none());
        assert!(canonical_page_url("mailto:someone@example.com").is_none());
        assert!(canonical_page_url("ftp://example.com/file").is_none());
    }

    #[test]
    fn test_equivalent_spellings_share_item_id() {
        let a = canonical_page_url("https://EXAMPLE.com/post").unwrap();
        let b = canonical_page_url("  https://example.com/post ").unwrap();
        assert_eq!(item_id(&a), item_id(&b));
    }

    proptest! {
        #[test]
        fn canonicalization_is_idempotent(path in "[a-zA-Z0-9 ._~-]{0,40}") {
            let raw = format!("https://example.com/{}", path);
            if let Some(once) = canonical_page_url(&raw) {
                let twice = canonical_page_url(&once).unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
