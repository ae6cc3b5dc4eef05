//! Two-tier record storage.
//!
//! Every namespace has an ephemeral tier (in memory, used while a run is in
//! progress) and a durable tier (a SQLite file under the data directory).
//! Data moves between them only on open (durable to ephemeral, once per
//! process) and on [`RecordStore::save`] (ephemeral over durable).
//!
//! - [`keys`] - feed identities and content-addressed item IDs
//! - [`tier`] - the [`Tier`] interface and the in-memory backend
//! - [`schema`] - the SQLite durable backend
//! - [`store`] - [`Storage`] and exclusive [`RecordStore`] handles
//! - [`revalidation`] - per-feed conditional-request state and its sidecar file

pub mod keys;
pub mod revalidation;
mod schema;
mod store;
mod tier;
mod types;

pub use keys::{canonical_page_url, item_id, FeedIdentity, POOL_NAMESPACE};
pub use schema::SqliteTier;
pub use store::{RecordStore, Storage};
pub use tier::{copy_tier, MemoryTier, Tier};
pub use types::{
    FeedFailure, FeedRevalidationState, FeedStatus, ItemRecord, Namespace, Record, StoreError,
    SCHEMA_VERSION,
};
