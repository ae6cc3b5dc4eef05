use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::schema::SqliteTier;
use super::tier::{MemoryTier, Tier};
use super::types::{ItemRecord, Namespace, Record, StoreError};

/// File name of the durable tier inside a namespace directory.
const DURABLE_FILE: &str = "records.db";

/// Ephemeral tier for one namespace plus whether durable contents were loaded.
#[derive(Debug, Default)]
struct EphemeralSlot {
    tier: MemoryTier,
    loaded: bool,
}

// ============================================================================
// Storage
// ============================================================================

/// Root of every namespace: durable files under `root`, ephemeral tiers in memory.
///
/// Ephemeral tiers outlive individual [`RecordStore`] handles, so closing and
/// reopening a namespace within one process does not reload it from disk.
/// Clones share the same ephemeral tiers.
#[derive(Clone, Debug)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

#[derive(Debug)]
struct StorageInner {
    root: PathBuf,
    ephemeral: Mutex<HashMap<Namespace, Arc<AsyncMutex<EphemeralSlot>>>>,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                root: root.into(),
                ephemeral: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Directory holding a namespace's durable tier and sidecar files.
    pub fn namespace_dir(&self, namespace: &Namespace) -> PathBuf {
        self.inner.root.join(namespace.as_str())
    }

    pub fn durable_path(&self, namespace: &Namespace) -> PathBuf {
        self.namespace_dir(namespace).join(DURABLE_FILE)
    }

    fn slot(&self, namespace: &Namespace) -> Arc<AsyncMutex<EphemeralSlot>> {
        let mut slots = self
            .inner
            .ephemeral
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(namespace.clone()).or_default())
    }

    /// Acquire exclusive access to `namespace`.
    ///
    /// The first open of a namespace in this process loads its durable tier.
    /// A corrupt durable tier is logged and treated as empty.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` while another handle holds the namespace.
    pub async fn open(&self, namespace: &Namespace) -> Result<RecordStore, StoreError> {
        let guard = self.acquire(namespace).await?;
        Ok(RecordStore {
            namespace: namespace.clone(),
            storage: self.clone(),
            handle: Some(guard),
        })
    }

    async fn acquire(
        &self,
        namespace: &Namespace,
    ) -> Result<OwnedMutexGuard<EphemeralSlot>, StoreError> {
        let mut guard = self
            .slot(namespace)
            .try_lock_owned()
            .map_err(|_| StoreError::Locked(namespace.to_string()))?;

        if !guard.loaded {
            let entries = self.load_durable(namespace).await?;
            tracing::debug!(
                namespace = %namespace,
                entries = entries.len(),
                "Loaded durable tier into ephemeral tier"
            );
            guard.tier.load(entries);
            guard.loaded = true;
        }

        Ok(guard)
    }

    async fn load_durable(
        &self,
        namespace: &Namespace,
    ) -> Result<Vec<(String, Record)>, StoreError> {
        let path = self.durable_path(namespace);
        let durable = match SqliteTier::open_existing(&path).await {
            Ok(Some(durable)) => durable,
            Ok(None) => return Ok(Vec::new()),
            Err(e) if e.is_corrupt() => {
                tracing::warn!(namespace = %namespace, error = %e, "Durable tier corrupt, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let result = durable.entries().await;
        durable.close().await;
        match result {
            Ok(entries) => Ok(entries),
            Err(e) if e.is_corrupt() => {
                tracing::warn!(namespace = %namespace, error = %e, "Durable tier corrupt, starting empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Delete both tiers of `namespace`. Irreversible.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if a handle still holds the namespace.
    pub async fn purge(&self, namespace: &Namespace) -> Result<(), StoreError> {
        {
            let mut slots = self
                .inner
                .ephemeral
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slots.get(namespace) {
                if slot.try_lock().is_err() {
                    return Err(StoreError::Locked(namespace.to_string()));
                }
                slots.remove(namespace);
            }
        }

        match tokio::fs::remove_dir_all(self.namespace_dir(namespace)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(e)),
        }
        tracing::info!(namespace = %namespace, "Purged namespace");
        Ok(())
    }
}

// ============================================================================
// Record Store
// ============================================================================

/// Exclusive handle on one namespace.
///
/// Reads and writes go to the ephemeral tier; only [`save`](Self::save)
/// touches the durable tier. Dropping the handle releases it like
/// [`close`](Self::close).
#[derive(Debug)]
pub struct RecordStore {
    namespace: Namespace,
    storage: Storage,
    handle: Option<OwnedMutexGuard<EphemeralSlot>>,
}

impl RecordStore {
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn tier(&self) -> Result<&MemoryTier, StoreError> {
        self.handle
            .as_ref()
            .map(|guard| &guard.tier)
            .ok_or_else(|| StoreError::NotOpen(self.namespace.to_string()))
    }

    fn tier_mut(&mut self) -> Result<&mut MemoryTier, StoreError> {
        let namespace = &self.namespace;
        self.handle
            .as_mut()
            .map(|guard| &mut guard.tier)
            .ok_or_else(|| StoreError::NotOpen(namespace.to_string()))
    }

    /// `Ok(None)` when the key is absent.
    pub fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.tier()?.get(key).cloned())
    }

    /// The item stored under `key`, ignoring non-item records.
    pub fn get_item(&self, key: &str) -> Result<Option<ItemRecord>, StoreError> {
        Ok(self.get(key)?.and_then(Record::into_item))
    }

    pub fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.tier()?.contains(key))
    }

    /// Upsert. The record is replaced whole, never field by field.
    pub fn put(&mut self, key: impl Into<String>, record: Record) -> Result<(), StoreError> {
        self.tier_mut()?.insert(key.into(), record);
        Ok(())
    }

    /// Snapshot of every entry at call time, ordered by key.
    pub fn iter(&self) -> Result<impl Iterator<Item = (String, Record)>, StoreError> {
        Ok(self.tier()?.snapshot().into_iter())
    }

    /// Snapshot of the item records only.
    pub fn items(&self) -> Result<impl Iterator<Item = ItemRecord>, StoreError> {
        Ok(self.iter()?.filter_map(|(_, record)| record.into_item()))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.tier()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.tier()?.is_empty())
    }

    /// Close the ephemeral handle, then overwrite the durable tier with its contents.
    ///
    /// The handle is closed afterwards even if the durable write fails; the
    /// ephemeral contents survive for the next [`reopen`](Self::reopen).
    /// Returns the number of entries written.
    pub async fn save(&mut self) -> Result<usize, StoreError> {
        let guard = self
            .handle
            .take()
            .ok_or_else(|| StoreError::NotOpen(self.namespace.to_string()))?;
        let snapshot = guard.tier.clone();
        drop(guard);

        let path = self.storage.durable_path(&self.namespace);
        let mut durable = SqliteTier::create(&path).await?;
        let result = super::tier::copy_tier(&snapshot, &mut durable).await;
        durable.close().await;
        let written = result?;

        tracing::debug!(namespace = %self.namespace, entries = written, "Saved to durable tier");
        Ok(written)
    }

    /// Release the handle without touching the durable tier.
    pub fn close(&mut self) {
        self.handle = None;
    }

    /// Reacquire a closed handle. A no-op when already open.
    pub async fn reopen(&mut self) -> Result<(), StoreError> {
        if self.handle.is_none() {
            self.handle = Some(self.storage.acquire(&self.namespace).await?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::FeedRevalidationState;

    fn ns(name: &str) -> Namespace {
        Namespace::new(name).unwrap()
    }

    fn record(etag: &str) -> Record {
        Record::Feed(FeedRevalidationState {
            etag: Some(etag.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_open_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let mut store = storage.open(&ns("a")).await.unwrap();
        assert!(store.is_empty().unwrap());
        store.put("k", record("1")).unwrap();

        assert_eq!(store.get("k").unwrap(), Some(record("1")));
        assert!(store.get("missing").unwrap().is_none());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_handle_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let mut first = storage.open(&ns("a")).await.unwrap();
        let err = storage.open(&ns("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Locked(_)));

        // Other namespaces are independent
        assert!(storage.open(&ns("b")).await.is_ok());

        first.close();
        assert!(storage.open(&ns("a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_store_is_not_open() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let mut store = storage.open(&ns("a")).await.unwrap();
        store.close();

        assert!(matches!(store.get("k"), Err(StoreError::NotOpen(_))));
        assert!(matches!(store.put("k", record("1")), Err(StoreError::NotOpen(_))));
        assert!(matches!(store.iter().err(), Some(StoreError::NotOpen(_))));
        assert!(matches!(store.save().await, Err(StoreError::NotOpen(_))));
    }

    #[tokio::test]
    async fn test_close_keeps_ephemeral_contents() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let mut store = storage.open(&ns("a")).await.unwrap();
        store.put("k", record("1")).unwrap();
        store.close();

        // Nothing reached disk
        assert!(!storage.durable_path(&ns("a")).exists());

        store.reopen().await.unwrap();
        assert_eq!(store.get("k").unwrap(), Some(record("1")));
    }

    #[tokio::test]
    async fn test_save_then_load_in_new_process() {
        let dir = tempfile::tempdir().unwrap();

        {
            let storage = Storage::new(dir.path());
            let mut store = storage.open(&ns("a")).await.unwrap();
            store.put("k", record("1")).unwrap();
            assert_eq!(store.save().await.unwrap(), 1);
            assert!(!store.is_open());
        }

        // A fresh Storage has no ephemeral tiers: simulates the next run
        let storage = Storage::new(dir.path());
        let store = storage.open(&ns("a")).await.unwrap();
        assert_eq!(store.get("k").unwrap(), Some(record("1")));
    }

    #[tokio::test]
    async fn test_save_overwrites_durable_tier() {
        let dir = tempfile::tempdir().unwrap();

        {
            let storage = Storage::new(dir.path());
            let mut store = storage.open(&ns("a")).await.unwrap();
            store.put("old", record("old")).unwrap();
            store.save().await.unwrap();
        }

        {
            let storage = Storage::new(dir.path());
            let mut store = storage.open(&ns("a")).await.unwrap();
            assert!(store.contains("old").unwrap());
            store.put("new", record("new")).unwrap();
            store.save().await.unwrap();
        }

        let storage = Storage::new(dir.path());
        let store = storage.open(&ns("a")).await.unwrap();
        let keys: Vec<String> = store.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["new".to_string(), "old".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_durable_tier_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let path = storage.durable_path(&ns("a"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"").unwrap();

        let mut store = storage.open(&ns("a")).await.unwrap();
        assert!(store.is_empty().unwrap());

        // Saving replaces the corrupt file with a valid one
        store.put("k", record("1")).unwrap();
        store.save().await.unwrap();

        let storage = Storage::new(dir.path());
        let store = storage.open(&ns("a")).await.unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_garbage_durable_tier_is_saved_over() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let path = storage.durable_path(&ns("a"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        let mut store = storage.open(&ns("a")).await.unwrap();
        assert!(store.is_empty().unwrap());
        store.put("k", record("1")).unwrap();
        assert_eq!(store.save().await.unwrap(), 1);

        // The next run reads what was saved
        let storage = Storage::new(dir.path());
        let store = storage.open(&ns("a")).await.unwrap();
        assert_eq!(store.get("k").unwrap(), Some(record("1")));
    }

    #[tokio::test]
    async fn test_iter_is_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let mut store = storage.open(&ns("a")).await.unwrap();
        store.put("a", record("a")).unwrap();

        let snapshot = store.iter().unwrap();
        store.put("b", record("b")).unwrap();

        assert_eq!(snapshot.count(), 1);
        assert_eq!(store.iter().unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_purge_removes_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let mut store = storage.open(&ns("a")).await.unwrap();
        store.put("k", record("1")).unwrap();
        store.save().await.unwrap();

        storage.purge(&ns("a")).await.unwrap();
        assert!(!storage.namespace_dir(&ns("a")).exists());

        let store = storage.open(&ns("a")).await.unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_purge_refuses_held_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let _store = storage.open(&ns("a")).await.unwrap();
        let err = storage.purge(&ns("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Locked(_)));
    }

    #[tokio::test]
    async fn test_purge_missing_namespace_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        storage.purge(&ns("never-opened")).await.unwrap();
    }
}
