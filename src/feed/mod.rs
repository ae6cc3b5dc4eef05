//! Feed retrieval and the per-feed fetch engine.
//!
//! - [`source`] - the retrieval interfaces the engine consumes
//! - [`fetcher`] - HTTP implementation with conditional requests, retries
//!   and manual redirect handling
//! - [`parser`] - RSS/Atom parsing via `feed-rs`
//! - [`subscription`] / [`opml`] - the feed list (plain text or OPML)
//! - [`engine`] - [`FeedEngine`], one per feed

pub mod engine;
pub mod fetcher;
pub mod opml;
pub mod parser;
pub mod source;
pub mod subscription;

pub use engine::{
    Collaborators, CycleOutcome, EngineError, EngineState, FeedEngine, ItemOutcome, ItemTally,
};
pub use fetcher::{FetchError, HttpFetcher};
pub use source::{FeedEntry, FeedResponse, FeedSource, Page, PageFetch, PageSource, Validators};
pub use subscription::{load_subscriptions, parse_subscriptions, FeedListError, Subscription};
