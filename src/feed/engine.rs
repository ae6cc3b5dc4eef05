//! Per-feed fetch engine.
//!
//! A [`FeedEngine`] owns one feed's [`RecordStore`] namespace and runs
//! fetch cycles against it:
//!
//! 1. request the feed (corrected URL when known) with its revalidation hints
//! 2. classify the response: network failure, HTTP error, not modified, or entries
//! 3. create or update one item record per entry page
//! 4. store the new revalidation state next to the items
//!
//! Per-item problems never fail a cycle. Only store errors surface as
//! [`EngineError`].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use super::source::{FeedEntry, FeedResponse, FeedSource, PageFetch, PageSource, Validators};
use super::subscription::Subscription;
use crate::config::GonePolicy;
use crate::storage::revalidation::{self, SIDECAR_FILE};
use crate::storage::{
    canonical_page_url, item_id, FeedFailure, FeedIdentity, FeedRevalidationState, FeedStatus,
    ItemRecord, Record, RecordStore, Storage, StoreError, SCHEMA_VERSION,
};
use crate::text::TextPipeline;
use crate::util::{format_http_date, parse_http_date};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Everything an engine talks to besides its own store.
#[derive(Clone)]
pub struct Collaborators {
    pub feeds: Arc<dyn FeedSource>,
    pub pages: Arc<dyn PageSource>,
    pub text: TextPipeline,
}

impl Collaborators {
    pub fn new(feeds: Arc<dyn FeedSource>, pages: Arc<dyn PageSource>) -> Self {
        Self {
            feeds,
            pages,
            text: TextPipeline::default(),
        }
    }

    pub fn with_text(mut self, text: TextPipeline) -> Self {
        self.text = text;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Lifecycle position of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Never fetched: no revalidation state yet.
    Fresh,
    /// Has revalidation hints or a completed cycle behind it.
    Cached,
    /// The last feed request failed at the network level, or did at some
    /// point and nobody has reset it since.
    Gone,
}

/// Result of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// New record; `page_fetched` is false when only feed fields were available.
    Created { page_fetched: bool },
    Updated,
    /// The page answered 304.
    Unchanged,
    /// Page retrieval failed; the stored record was left as it was.
    PageFailed(String),
    /// No usable page URL.
    Dropped,
}

/// Per-cycle item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemTally {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub page_failures: usize,
    pub dropped: usize,
}

impl ItemTally {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Created { .. } => self.created += 1,
            ItemOutcome::Updated => self.updated += 1,
            ItemOutcome::Unchanged => self.unchanged += 1,
            ItemOutcome::PageFailed(_) => self.page_failures += 1,
            ItemOutcome::Dropped => self.dropped += 1,
        }
    }
}

/// How a fetch cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Entries were processed.
    Fetched(ItemTally),
    /// The feed answered 304.
    NotModified,
    /// Feed is gone and the policy says not to ask.
    Skipped,
    /// No response at all; the feed is now gone.
    Unreachable(String),
    /// The feed answered with an error status.
    HttpError(u16),
    /// The response body was not a readable feed.
    Unreadable(String),
}

pub struct FeedEngine {
    subscription: Subscription,
    identity: FeedIdentity,
    storage: Storage,
    store: RecordStore,
    state: FeedRevalidationState,
    collaborators: Collaborators,
    gone_policy: GonePolicy,
}

impl std::fmt::Debug for FeedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedEngine")
            .field("url", &self.subscription.url)
            .field("identity", &self.identity.as_str())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl FeedEngine {
    /// Open the feed's namespace and load its revalidation state.
    ///
    /// When the store holds no state but a sidecar file exists (written by
    /// an earlier run, or by hand), the sidecar is imported.
    pub async fn open(
        subscription: Subscription,
        storage: &Storage,
        collaborators: Collaborators,
        gone_policy: GonePolicy,
    ) -> Result<Self, EngineError> {
        let identity = FeedIdentity::from_url(&subscription.url);
        let mut store = storage.open(&identity.namespace()).await?;

        let state = match revalidation::load(&store, &identity)? {
            Some(state) => state,
            None => {
                let sidecar = storage.namespace_dir(&identity.namespace()).join(SIDECAR_FILE);
                match revalidation::read_sidecar(&sidecar).await? {
                    Some(imported) => {
                        tracing::info!(feed = %identity, "Imported revalidation sidecar");
                        revalidation::save(&mut store, &identity, &imported)?;
                        imported
                    }
                    None => FeedRevalidationState::default(),
                }
            }
        };

        tracing::debug!(
            feed = %identity,
            url = %subscription.url,
            status = ?state.status,
            corrected_url = ?state.corrected_url,
            "Opened feed engine"
        );

        Ok(Self {
            subscription,
            identity,
            storage: storage.clone(),
            store,
            state,
            collaborators,
            gone_policy,
        })
    }

    pub fn identity(&self) -> &FeedIdentity {
        &self.identity
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn revalidation(&self) -> &FeedRevalidationState {
        &self.state
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn state(&self) -> EngineState {
        let has_hints = self.state.last_modified.is_some()
            || self.state.etag.is_some()
            || self.state.corrected_url.is_some();
        if self.state.is_gone() {
            EngineState::Gone
        } else if self.state.last_fetched.is_some() || has_hints {
            EngineState::Cached
        } else {
            EngineState::Fresh
        }
    }

    /// URL the next request goes to.
    pub fn target_url(&self) -> &str {
        self.state.target_url(&self.subscription.url)
    }

    /// Reopen the store if a save or close released it.
    pub async fn ensure_open(&mut self) -> Result<(), EngineError> {
        self.store.reopen().await?;
        Ok(())
    }

    /// Run one fetch cycle.
    pub async fn fetch_cycle(&mut self) -> Result<CycleOutcome, EngineError> {
        self.ensure_open().await?;

        if self.state.is_gone() && self.gone_policy == GonePolicy::Skip {
            tracing::debug!(feed = %self.identity, "Feed is gone, skipping");
            return Ok(CycleOutcome::Skipped);
        }

        let target = self.target_url().to_string();
        let hints = Validators {
            last_modified: self.state.last_modified.clone(),
            etag: self.state.etag.clone(),
        };
        let now = Utc::now();

        let result = self.collaborators.feeds.fetch_feed(&target, &hints).await;
        let outcome = match result {
            Err(e) if e.is_network_failure() => {
                tracing::warn!(feed = %self.identity, url = %target, error = %e, "Feed unreachable, marking gone");
                self.state.status = FeedStatus::Gone;
                self.state.last_failure = Some(FeedFailure::Network(e.to_string()));
                CycleOutcome::Unreachable(e.to_string())
            }
            Err(e) => {
                tracing::warn!(feed = %self.identity, url = %target, error = %e, "Feed unreadable");
                self.state.last_failure = Some(FeedFailure::Unreadable(e.to_string()));
                CycleOutcome::Unreadable(e.to_string())
            }
            Ok(response) if response.status >= 400 => {
                tracing::warn!(feed = %self.identity, url = %target, status = response.status, "Feed returned error status");
                self.state.last_failure = Some(FeedFailure::HttpStatus(response.status));
                CycleOutcome::HttpError(response.status)
            }
            Ok(response) => self.apply_response(response, now).await?,
        };

        self.state.last_fetched = Some(now);
        revalidation::save(&mut self.store, &self.identity, &self.state)?;

        tracing::info!(feed = %self.identity, outcome = ?outcome, "Fetch cycle complete");
        Ok(outcome)
    }

    async fn apply_response(
        &mut self,
        response: FeedResponse,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, EngineError> {
        if let Some(location) = response.permanent_redirect() {
            if self.state.corrected_url.as_deref() != Some(location) {
                tracing::info!(
                    feed = %self.identity,
                    from = %self.target_url(),
                    to = %location,
                    "Feed permanently redirected"
                );
                self.state.corrected_url = Some(location.to_string());
            }
        }
        self.state.last_failure = None;

        if response.is_not_modified() {
            // A 304 may omit the validators; keep the ones we sent
            let FeedResponse { validators, .. } = response;
            if validators.last_modified.is_some() {
                self.state.last_modified = validators.last_modified;
            }
            if validators.etag.is_some() {
                self.state.etag = validators.etag;
            }
            return Ok(CycleOutcome::NotModified);
        }

        let mut tally = ItemTally::default();
        for entry in &response.entries {
            let outcome = self.process_entry(entry, now).await?;
            tally.record(&outcome);
        }

        self.state.last_modified = response.validators.last_modified;
        self.state.etag = response.validators.etag;
        Ok(CycleOutcome::Fetched(tally))
    }

    /// Create or update the record for one entry.
    pub async fn process_entry(
        &mut self,
        entry: &FeedEntry,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, EngineError> {
        let page_url = entry
            .link
            .iter()
            .chain(entry.links.first())
            .find_map(|candidate| canonical_page_url(candidate));
        let Some(page_url) = page_url else {
            tracing::debug!(feed = %self.identity, title = ?entry.title, "Entry has no usable link, dropped");
            return Ok(ItemOutcome::Dropped);
        };

        let id = item_id(&page_url);
        match self.store.get_item(&id)? {
            Some(existing) => self.update_item(existing).await,
            None => self.create_item(id, page_url, entry, now).await,
        }
    }

    async fn create_item(
        &mut self,
        id: String,
        page_url: String,
        entry: &FeedEntry,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, EngineError> {
        let date = entry
            .published
            .or(entry.created)
            .or(entry.updated)
            .unwrap_or(now);
        let title = entry.title.clone();
        let description = entry.summary.clone().or_else(|| title.clone());

        let (page_text, etag, page_fetched) = match self
            .collaborators
            .pages
            .fetch_page(&page_url, &Validators::default())
            .await
        {
            Ok(PageFetch::Fetched(page)) => (
                self.collaborators.text.extractor.extract(&page.body),
                page.validators.etag,
                true,
            ),
            Ok(PageFetch::NotModified) => (String::new(), None, false),
            Err(e) => {
                tracing::debug!(feed = %self.identity, url = %page_url, error = %e, "Page download failed");
                (String::new(), None, false)
            }
        };

        let text = &self.collaborators.text;
        let language = text.detect_first([
            description.as_deref(),
            title.as_deref(),
            Some(page_text.as_str()),
        ]);
        let normalized_content = text.normalize_parts(
            [title.as_deref(), description.as_deref(), Some(page_text.as_str())],
            language.as_deref(),
        );

        let record = ItemRecord {
            item_id: id.clone(),
            feed_url: self.target_url().to_string(),
            page_url,
            date,
            title,
            description,
            language,
            normalized_content,
            etag,
            labels: self.subscription.labels.clone(),
            predicted_label: None,
            schema_version: SCHEMA_VERSION,
        };
        self.store.put(id, Record::Item(record))?;
        Ok(ItemOutcome::Created { page_fetched })
    }

    /// Revalidate an existing item's page. Any failure leaves the record untouched.
    async fn update_item(&mut self, existing: ItemRecord) -> Result<ItemOutcome, EngineError> {
        let hints = Validators {
            last_modified: Some(format_http_date(&existing.date)),
            etag: existing.etag.clone(),
        };

        let page = match self
            .collaborators
            .pages
            .fetch_page(&existing.page_url, &hints)
            .await
        {
            Ok(PageFetch::Fetched(page)) => page,
            Ok(PageFetch::NotModified) => return Ok(ItemOutcome::Unchanged),
            Err(e) => {
                tracing::debug!(feed = %self.identity, url = %existing.page_url, error = %e, "Item update failed, keeping stored record");
                return Ok(ItemOutcome::PageFailed(e.to_string()));
            }
        };

        let text = &self.collaborators.text;
        let page_text = text.extractor.extract(&page.body);
        let normalized_content = text.normalize_parts(
            [
                existing.title.as_deref(),
                existing.description.as_deref(),
                Some(page_text.as_str()),
            ],
            existing.language.as_deref(),
        );
        let date = page
            .validators
            .last_modified
            .as_deref()
            .and_then(parse_http_date)
            .unwrap_or(existing.date);

        let key = existing.item_id.clone();
        let record = ItemRecord {
            date,
            normalized_content,
            etag: page.validators.etag,
            labels: self.subscription.labels.clone(),
            predicted_label: None,
            schema_version: SCHEMA_VERSION,
            ..existing
        };
        self.store.put(key, Record::Item(record))?;
        Ok(ItemOutcome::Updated)
    }

    /// Clear the gone status. Returns false when the feed was not gone.
    pub async fn reset_gone(&mut self) -> Result<bool, EngineError> {
        if !self.state.is_gone() {
            return Ok(false);
        }
        self.ensure_open().await?;
        self.state.status = FeedStatus::Active;
        self.state.last_failure = None;
        revalidation::save(&mut self.store, &self.identity, &self.state)?;
        tracing::info!(feed = %self.identity, "Gone status reset");
        Ok(true)
    }

    /// Make the feed durable: store contents plus the sidecar file.
    ///
    /// The store handle is closed afterwards; the next cycle reopens it.
    pub async fn save(&mut self) -> Result<usize, EngineError> {
        self.ensure_open().await?;
        revalidation::save(&mut self.store, &self.identity, &self.state)?;
        let written = self.store.save().await?;

        let sidecar = self
            .storage
            .namespace_dir(&self.identity.namespace())
            .join(SIDECAR_FILE);
        revalidation::write_sidecar(&sidecar, &self.state).await?;
        Ok(written)
    }

    /// Release the store handle without saving.
    pub fn close(&mut self) {
        self.store.close();
    }
}
