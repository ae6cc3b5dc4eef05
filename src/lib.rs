//! Incremental RSS content mirror.
//!
//! Each subscribed feed gets a [`FeedEngine`](feed::FeedEngine) that fetches
//! it conditionally and keeps one record per linked page in its own
//! [`RecordStore`](storage::RecordStore) namespace. An
//! [`EnginePool`](pool::EnginePool) runs the engines, merges their stores
//! into one pool-level store and persists everything to the durable tier.

pub mod config;
pub mod feed;
pub mod pool;
pub mod storage;
pub mod text;
pub mod util;

pub use config::{Config, GonePolicy};
pub use pool::{EnginePool, EngineReport, MergeReport, PersistReport, PoolOptions};
