//! Configuration file parser for `feedstash.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// What a fetch cycle does for a feed already marked gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GonePolicy {
    /// Keep requesting the feed; the gone status stays until reset.
    #[default]
    Retry,
    /// Do not request the feed at all until reset.
    Skip,
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of every namespace directory (one per feed plus the merged store).
    pub data_dir: PathBuf,

    /// Feed list: plain text (`url label...` per line) or OPML.
    pub feeds_file: PathBuf,

    /// Run engines concurrently instead of one after another.
    pub parallel: bool,

    /// Upper bound on concurrently running engines. 0 = one task per feed.
    pub max_concurrent_feeds: usize,

    /// Total time allowed for one HTTP request, including the body.
    pub request_timeout_secs: u64,

    pub connect_timeout_secs: u64,

    /// Retries after HTTP 429/5xx or a truncated body (2s, 4s, 8s, ...).
    pub max_retries: u32,

    pub max_feed_bytes: usize,

    pub max_page_bytes: usize,

    /// Redirect hops followed per request before giving up.
    pub max_redirects: usize,

    pub user_agent: String,

    /// Allow feeds and pages on loopback or private addresses.
    pub allow_private_hosts: bool,

    pub gone_policy: GonePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            feeds_file: PathBuf::from("feeds.txt"),
            parallel: true,
            max_concurrent_feeds: 0,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_retries: 3,
            max_feed_bytes: 10 * 1024 * 1024, // 10MB
            max_page_bytes: 5 * 1024 * 1024,  // 5MB
            max_redirects: 3,
            user_agent: concat!("feedstash/", env!("CARGO_PKG_VERSION")).to_string(),
            allow_private_hosts: false,
            gone_policy: GonePolicy::Retry,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 13] = [
        "data_dir",
        "feeds_file",
        "parallel",
        "max_concurrent_feeds",
        "request_timeout_secs",
        "connect_timeout_secs",
        "max_retries",
        "max_feed_bytes",
        "max_page_bytes",
        "max_redirects",
        "user_agent",
        "allow_private_hosts",
        "gone_policy",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            data_dir = %config.data_dir.display(),
            gone_policy = ?config.gone_policy,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
