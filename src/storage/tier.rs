//! Storage tiers.
//!
//! A tier is a flat key/record map. Two backends implement [`Tier`]:
//!
//! - [`MemoryTier`] - the ephemeral tier, an ordered in-process map
//! - [`SqliteTier`](super::SqliteTier) - the durable tier, one SQLite file per namespace
//!
//! Moving data between tiers is always a whole-tier copy ([`copy_tier`]):
//! the destination ends up with exactly the source's contents.

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::types::{Record, StoreError};

/// Key/record storage backend.
#[async_trait]
pub trait Tier: Send + Sync {
    /// Backend name for logs (e.g. `"memory"`, `"sqlite"`).
    fn backend_name(&self) -> &'static str;

    /// Every entry, ordered by key.
    async fn entries(&self) -> Result<Vec<(String, Record)>, StoreError>;

    /// Replace the whole tier with `entries`.
    async fn replace_all(&mut self, entries: &[(String, Record)]) -> Result<(), StoreError>;
}

/// Overwrite `to` with the full contents of `from`. Returns the entry count.
pub async fn copy_tier(from: &dyn Tier, to: &mut dyn Tier) -> Result<usize, StoreError> {
    let entries = from.entries().await?;
    to.replace_all(&entries).await?;
    tracing::debug!(
        from = from.backend_name(),
        to = to.backend_name(),
        entries = entries.len(),
        "Copied tier"
    );
    Ok(entries.len())
}

/// Ephemeral tier: an ordered map living in process memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryTier {
    records: BTreeMap<String, Record>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn insert(&mut self, key: String, record: Record) {
        self.records.insert(key, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Owned copy of every entry, ordered by key.
    pub fn snapshot(&self) -> Vec<(String, Record)> {
        self.records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn load(&mut self, entries: Vec<(String, Record)>) {
        self.records = entries.into_iter().collect();
    }
}

#[async_trait]
impl Tier for MemoryTier {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn entries(&self) -> Result<Vec<(String, Record)>, StoreError> {
        Ok(self.snapshot())
    }

    async fn replace_all(&mut self, entries: &[(String, Record)]) -> Result<(), StoreError> {
        self.load(entries.to_vec());
        Ok(())
    }
}
