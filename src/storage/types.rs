use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Version stamped on every item record and on the durable tier itself.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

// ============================================================================
// Error Types
// ============================================================================

/// Record store errors.
///
/// `Corrupt` is recoverable by contract: callers treat a corrupt tier as empty.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The handle was closed (or saved) and has not been reopened.
    #[error("Store for namespace '{0}' is not open")]
    NotOpen(String),

    /// Another handle currently holds the namespace.
    #[error("Namespace '{0}' is held by another store handle")]
    Locked(String),

    /// The durable file is zero-length, not a database, or holds undecodable records.
    #[error("Durable tier '{path}' is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    /// Namespace names are restricted to ASCII alphanumerics, `-` and `_`.
    #[error("Invalid namespace name: {0:?}")]
    InvalidNamespace(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }

    pub(crate) fn corrupt(path: &Path, reason: impl fmt::Display) -> Self {
        StoreError::Corrupt {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Namespace
// ============================================================================

/// Isolation boundary for one store: a directory name under the data root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(name))
        } else {
            Err(StoreError::InvalidNamespace(name))
        }
    }

    /// For names built from hex digests or constants, which are always valid.
    pub(crate) fn trusted(name: String) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Records
// ============================================================================

/// A stored value: either a feed's revalidation state or a page item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Feed(FeedRevalidationState),
    Item(ItemRecord),
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Feed(_) => "feed",
            Record::Item(_) => "item",
        }
    }

    pub fn as_item(&self) -> Option<&ItemRecord> {
        match self {
            Record::Item(item) => Some(item),
            Record::Feed(_) => None,
        }
    }

    pub fn into_item(self) -> Option<ItemRecord> {
        match self {
            Record::Item(item) => Some(item),
            Record::Feed(_) => None,
        }
    }

    pub fn into_feed(self) -> Option<FeedRevalidationState> {
        match self {
            Record::Feed(state) => Some(state),
            Record::Item(_) => None,
        }
    }
}

/// One record per distinct canonical page URL.
///
/// Field order is the export order: downstream consumers read the JSON
/// lines positionally as well as by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    /// SHA-256 of the canonical page URL; the store key.
    pub item_id: String,
    /// Owning feed, using the corrected URL once one is known.
    pub feed_url: String,
    pub page_url: String,
    /// Published date when the feed gave one, otherwise the fetch time.
    /// Item updates replace it with the page's `Last-Modified`.
    pub date: DateTime<Utc>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub normalized_content: String,
    pub etag: Option<String>,
    pub labels: Vec<String>,
    pub predicted_label: Option<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

/// Feed lifecycle status. `Gone` is only cleared by an operator reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    #[default]
    Active,
    Gone,
}

/// Why the last feed-level request did not produce entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum FeedFailure {
    /// No HTTP response at all (DNS, connect, TLS, timeout).
    Network(String),
    /// The server answered with a status >= 400.
    HttpStatus(u16),
    /// The body could not be read or parsed as a feed.
    Unreadable(String),
}

impl fmt::Display for FeedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedFailure::Network(reason) => write!(f, "network failure: {}", reason),
            FeedFailure::HttpStatus(status) => write!(f, "HTTP status {}", status),
            FeedFailure::Unreadable(reason) => write!(f, "unreadable feed: {}", reason),
        }
    }
}

/// Per-feed conditional-request metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRevalidationState {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    /// Set by a permanent redirect; requests go here from then on.
    pub corrected_url: Option<String>,
    #[serde(default)]
    pub status: FeedStatus,
    /// Sentinel for the last failed cycle; cleared by the next completed one.
    #[serde(default)]
    pub last_failure: Option<FeedFailure>,
    #[serde(default)]
    pub last_fetched: Option<DateTime<Utc>>,
}

impl FeedRevalidationState {
    pub fn is_gone(&self) -> bool {
        self.status == FeedStatus::Gone
    }

    /// URL the next request should target.
    pub fn target_url<'a>(&'a self, original: &'a str) -> &'a str {
        self.corrected_url.as_deref().unwrap_or(original)
    }
}
