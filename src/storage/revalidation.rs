//! Feed revalidation state: repository over a [`RecordStore`] plus the
//! three-line sidecar file format.
//!
//! The sidecar holds `lastModified`, `etag` and `correctedURL`, one per line,
//! with the literal `None` for an absent value. A first line of `400` on its
//! own marks the feed as gone; the remaining lines are then ignored.

use std::path::Path;

use super::keys::FeedIdentity;
use super::store::RecordStore;
use super::types::{FeedRevalidationState, FeedStatus, Record, StoreError};

/// Literal written for an absent sidecar value.
const ABSENT: &str = "None";
/// First-line marker of a gone feed.
const GONE_MARKER: &str = "400";
/// Sidecar file name inside a feed's namespace directory.
pub const SIDECAR_FILE: &str = "revalidation";

/// Load the state stored under the feed's identity.
///
/// `Ok(None)` when the feed has never been fetched (or the key holds
/// something other than revalidation state).
pub fn load(
    store: &RecordStore,
    identity: &FeedIdentity,
) -> Result<Option<FeedRevalidationState>, StoreError> {
    Ok(store.get(identity.as_str())?.and_then(Record::into_feed))
}

pub fn save(
    store: &mut RecordStore,
    identity: &FeedIdentity,
    state: &FeedRevalidationState,
) -> Result<(), StoreError> {
    store.put(identity.as_str(), Record::Feed(state.clone()))
}

// ============================================================================
// Sidecar codec
// ============================================================================

/// Render `state` as the three-line sidecar.
///
/// A gone feed is written as the marker alone, so its hints are not
/// carried by the sidecar.
pub fn encode_sidecar(state: &FeedRevalidationState) -> String {
    if state.is_gone() {
        return GONE_MARKER.to_string();
    }
    let line = |value: &Option<String>| value.as_deref().unwrap_or(ABSENT).to_string();
    format!(
        "{}\n{}\n{}",
        line(&state.last_modified),
        line(&state.etag),
        line(&state.corrected_url)
    )
}

/// Parse a sidecar. Missing lines decode as absent values.
pub fn decode_sidecar(contents: &str) -> FeedRevalidationState {
    let mut lines = contents.lines().map(|l| l.trim_end_matches('\r'));
    let first = lines.next();

    if first == Some(GONE_MARKER) {
        return FeedRevalidationState {
            status: FeedStatus::Gone,
            ..Default::default()
        };
    }

    let value = |line: Option<&str>| match line {
        None | Some(ABSENT) | Some("") => None,
        Some(v) => Some(v.to_string()),
    };

    FeedRevalidationState {
        last_modified: value(first),
        etag: value(lines.next()),
        corrected_url: value(lines.next()),
        ..Default::default()
    }
}

/// Read the sidecar at `path`, `Ok(None)` when it does not exist.
pub async fn read_sidecar(path: &Path) -> Result<Option<FeedRevalidationState>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(decode_sidecar(&contents))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(e)),
    }
}

/// Write the sidecar through a temporary file and rename, so readers never
/// observe a partial file.
pub async fn write_sidecar(path: &Path, state: &FeedRevalidationState) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, encode_sidecar(state)).await?;
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StoreError::Io(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::Storage;
    use crate::storage::types::FeedFailure;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn cached_state() -> FeedRevalidationState {
        FeedRevalidationState {
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".to_string()),
            etag: Some("\"abc\"".to_string()),
            corrected_url: Some("https://new.example.com/rss".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_repository_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let identity = FeedIdentity::from_url("https://example.com/rss");
        let mut store = storage.open(&identity.namespace()).await.unwrap();

        assert!(load(&store, &identity).unwrap().is_none());

        let state = FeedRevalidationState {
            last_failure: Some(FeedFailure::HttpStatus(503)),
            ..cached_state()
        };
        save(&mut store, &identity, &state).unwrap();
        assert_eq!(load(&store, &identity).unwrap(), Some(state));
    }

    #[test]
    fn test_encode_all_present() {
        assert_eq!(
            encode_sidecar(&cached_state()),
            "Wed, 21 Oct 2015 07:28:00 GMT\n\"abc\"\nhttps://new.example.com/rss"
        );
    }

    #[test]
    fn test_encode_absent_values_use_sentinel() {
        let state = FeedRevalidationState::default();
        assert_eq!(encode_sidecar(&state), "None\nNone\nNone");
    }

    #[test]
    fn test_encode_gone_is_marker_only() {
        let state = FeedRevalidationState {
            status: FeedStatus::Gone,
            ..cached_state()
        };
        assert_eq!(encode_sidecar(&state), "400");
    }

    #[test]
    fn test_decode_gone_ignores_other_lines() {
        let state = decode_sidecar("400\n\"etag\"\nhttps://example.com");
        assert!(state.is_gone());
        assert_eq!(state.etag, None);
        assert_eq!(state.corrected_url, None);
    }

    #[test]
    fn test_decode_sentinels_and_short_files() {
        let state = decode_sidecar("None\n\"xyz\"");
        assert_eq!(state.last_modified, None);
        assert_eq!(state.etag.as_deref(), Some("\"xyz\""));
        assert_eq!(state.corrected_url, None);
        assert!(!state.is_gone());

        assert_eq!(decode_sidecar(""), FeedRevalidationState::default());
    }

    #[test]
    fn test_decode_crlf_line_endings() {
        let state = decode_sidecar("None\r\n\"e\"\r\nNone\r\n");
        assert_eq!(state.etag.as_deref(), Some("\"e\""));
    }

    #[tokio::test]
    async fn test_sidecar_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed").join(SIDECAR_FILE);

        assert!(read_sidecar(&path).await.unwrap().is_none());
        write_sidecar(&path, &cached_state()).await.unwrap();
        assert_eq!(read_sidecar(&path).await.unwrap(), Some(cached_state()));
    }

    proptest! {
        #[test]
        fn decode_never_panics(contents in "\\PC{0,200}") {
            let _ = decode_sidecar(&contents);
        }

        #[test]
        fn active_state_survives_encoding(
            last_modified in proptest::option::of("[A-Za-z0-9 ,:]{1,30}"),
            etag in proptest::option::of("[A-Za-z0-9\"/-]{1,20}"),
            corrected in proptest::option::of("https://[a-z]{1,10}\\.com/[a-z]{0,10}"),
        ) {
            // "None" and the gone marker are reserved on the first line
            prop_assume!(last_modified.as_deref() != Some(ABSENT));
            prop_assume!(last_modified.as_deref() != Some(GONE_MARKER));
            prop_assume!(etag.as_deref() != Some(ABSENT));
            let state = FeedRevalidationState {
                last_modified,
                etag,
                corrected_url: corrected,
                ..Default::default()
            };
            prop_assert_eq!(decode_sidecar(&encode_sidecar(&state)), state);
        }
    }
}
