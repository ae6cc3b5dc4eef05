//! Engine pool: one [`FeedEngine`] per subscription, run together and
//! merged into a single pool-level store.
//!
//! Engines never share a namespace, so running them concurrently needs no
//! locking. The pool waits for every engine before merging; merge and
//! persist run strictly one store at a time.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::GonePolicy;
use crate::feed::{Collaborators, CycleOutcome, EngineError, FeedEngine, Subscription};
use crate::storage::{
    FeedIdentity, FeedStatus, Namespace, RecordStore, Storage, StoreError, POOL_NAMESPACE,
};

/// Pool-wide knobs taken from the configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolOptions {
    pub gone_policy: GonePolicy,
    /// 0 = one task per engine, all at once.
    pub max_concurrent: usize,
}

/// What one engine's cycle produced, in construction order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineReport {
    pub url: String,
    pub identity: FeedIdentity,
    pub status: FeedStatus,
    /// `Err` holds the reason the cycle itself failed (store error or panic).
    pub outcome: Result<CycleOutcome, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Keys written into the shared store, counting overwrites.
    pub records_written: usize,
    /// Engines whose store could not be read.
    pub unavailable: Vec<FeedIdentity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub merged_records: usize,
    pub engines_saved: usize,
    pub failures: Vec<(FeedIdentity, String)>,
}

pub struct EnginePool {
    storage: Storage,
    collaborators: Collaborators,
    options: PoolOptions,
    engines: Vec<FeedEngine>,
    shared: Option<RecordStore>,
}

impl std::fmt::Debug for EnginePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnginePool")
            .field("engines", &self.engines.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

pub fn pool_namespace() -> Namespace {
    Namespace::trusted(POOL_NAMESPACE.to_string())
}

impl EnginePool {
    /// Build one engine per subscription, in order.
    ///
    /// Subscriptions repeating an earlier URL are folded into it, their
    /// labels appended, since two engines cannot share a namespace.
    pub async fn open(
        subscriptions: Vec<Subscription>,
        storage: Storage,
        collaborators: Collaborators,
        options: PoolOptions,
    ) -> Result<Self, EngineError> {
        let mut unique: Vec<Subscription> = Vec::with_capacity(subscriptions.len());
        for sub in subscriptions {
            match unique.iter_mut().find(|s| s.url == sub.url) {
                Some(existing) => {
                    tracing::warn!(url = %sub.url, "Duplicate subscription, merging labels");
                    for label in sub.labels {
                        if !existing.labels.contains(&label) {
                            existing.labels.push(label);
                        }
                    }
                }
                None => unique.push(sub),
            }
        }

        let mut engines = Vec::with_capacity(unique.len());
        for sub in unique {
            engines.push(
                FeedEngine::open(sub, &storage, collaborators.clone(), options.gone_policy).await?,
            );
        }

        tracing::info!(engines = engines.len(), "Engine pool ready");
        Ok(Self {
            storage,
            collaborators,
            options,
            engines,
            shared: None,
        })
    }

    pub fn engines(&self) -> &[FeedEngine] {
        &self.engines
    }

    pub fn engines_mut(&mut self) -> &mut [FeedEngine] {
        &mut self.engines
    }

    /// Run one fetch cycle on every engine and wait for all of them.
    ///
    /// Reports come back in construction order whichever mode is used. A
    /// panicking engine is reopened from its subscription so the pool stays
    /// complete.
    pub async fn run_all(&mut self, parallel: bool) -> Vec<EngineReport> {
        if parallel {
            self.run_parallel().await
        } else {
            self.run_sequential().await
        }
    }

    async fn run_sequential(&mut self) -> Vec<EngineReport> {
        let mut reports = Vec::with_capacity(self.engines.len());
        for engine in &mut self.engines {
            let outcome = engine.fetch_cycle().await.map_err(|e| e.to_string());
            reports.push(report(engine, outcome));
        }
        reports
    }

    async fn run_parallel(&mut self) -> Vec<EngineReport> {
        let engines = std::mem::take(&mut self.engines);
        let subscriptions: Vec<Subscription> =
            engines.iter().map(|e| e.subscription().clone()).collect();
        let limiter = (self.options.max_concurrent > 0)
            .then(|| Arc::new(Semaphore::new(self.options.max_concurrent)));

        let mut tasks = JoinSet::new();
        let mut task_index = HashMap::new();
        for (index, mut engine) in engines.into_iter().enumerate() {
            let limiter = limiter.clone();
            let handle = tasks.spawn(async move {
                let _permit = match limiter {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                let outcome = engine.fetch_cycle().await.map_err(|e| e.to_string());
                (index, engine, outcome)
            });
            task_index.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<(FeedEngine, Result<CycleOutcome, String>)>> =
            (0..subscriptions.len()).map(|_| None).collect();
        let mut panicked = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, engine, outcome)) => slots[index] = Some((engine, outcome)),
                Err(e) => {
                    if let Some(&index) = task_index.get(&e.id()) {
                        tracing::error!(url = %subscriptions[index].url, error = %e, "Engine task failed");
                        panicked.push((index, e.to_string()));
                    }
                }
            }
        }

        // Replace lost engines; their store handles were released on unwind
        for (index, reason) in panicked {
            let subscription = subscriptions[index].clone();
            match FeedEngine::open(
                subscription,
                &self.storage,
                self.collaborators.clone(),
                self.options.gone_policy,
            )
            .await
            {
                Ok(engine) => slots[index] = Some((engine, Err(reason))),
                Err(e) => {
                    tracing::error!(url = %subscriptions[index].url, error = %e, "Could not reopen engine");
                }
            }
        }

        let mut reports = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some((engine, outcome)) => {
                    reports.push(report(&engine, outcome));
                    self.engines.push(engine);
                }
                None => reports.push(EngineReport {
                    url: subscriptions[index].url.clone(),
                    identity: FeedIdentity::from_url(&subscriptions[index].url),
                    status: FeedStatus::Active,
                    outcome: Err("engine lost".to_string()),
                }),
            }
        }
        reports
    }

    async fn shared_store(&mut self) -> Result<&mut RecordStore, StoreError> {
        if self.shared.is_none() {
            self.shared = Some(self.storage.open(&pool_namespace()).await?);
        }
        let store = self
            .shared
            .as_mut()
            .ok_or_else(|| StoreError::NotOpen(POOL_NAMESPACE.to_string()))?;
        store.reopen().await?;
        Ok(store)
    }

    /// Union of every engine's store into the shared store.
    ///
    /// Engines are merged in construction order, so when two engines hold
    /// the same key the later one wins. An engine whose store cannot be
    /// read contributes nothing.
    pub async fn merge_all(&mut self) -> Result<MergeReport, StoreError> {
        let mut report = MergeReport::default();
        let mut batches = Vec::with_capacity(self.engines.len());

        for engine in &mut self.engines {
            let entries = match engine.ensure_open().await {
                Ok(()) => engine.store().iter().map(|entries| entries.collect::<Vec<_>>()),
                Err(EngineError::Store(e)) => Err(e),
            };
            match entries {
                Ok(entries) => batches.push(entries),
                Err(e) => {
                    tracing::warn!(feed = %engine.identity(), error = %e, "Engine store unavailable, skipping in merge");
                    report.unavailable.push(engine.identity().clone());
                }
            }
        }

        let shared = self.shared_store().await?;
        for entries in batches {
            for (key, record) in entries {
                shared.put(key, record)?;
                report.records_written += 1;
            }
        }

        tracing::info!(
            records = report.records_written,
            unavailable = report.unavailable.len(),
            "Merged engine stores"
        );
        Ok(report)
    }

    /// The merged store, reopened if a save released it.
    pub async fn merged(&mut self) -> Result<&RecordStore, StoreError> {
        Ok(&*self.shared_store().await?)
    }

    /// Save the shared store, then every engine.
    ///
    /// Engine failures are collected rather than stopping the loop; only a
    /// failure to save the shared store is an error.
    pub async fn persist(&mut self) -> Result<PersistReport, StoreError> {
        let mut report = PersistReport {
            merged_records: self.shared_store().await?.save().await?,
            ..Default::default()
        };

        for engine in &mut self.engines {
            match engine.save().await {
                Ok(_) => report.engines_saved += 1,
                Err(e) => {
                    tracing::warn!(feed = %engine.identity(), error = %e, "Failed to save engine store");
                    report.failures.push((engine.identity().clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            merged = report.merged_records,
            engines = report.engines_saved,
            failures = report.failures.len(),
            "Persisted pool"
        );
        Ok(report)
    }

    /// Clear the gone status of every engine. Returns how many were gone.
    pub async fn reset_gone_all(&mut self) -> Result<usize, EngineError> {
        let mut reset = 0;
        for engine in &mut self.engines {
            if engine.reset_gone().await? {
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// Delete every engine's namespace (both tiers). Irreversible.
    ///
    /// The engines are dropped from the pool; the merged store is kept.
    pub async fn purge_engines(&mut self) -> Result<usize, StoreError> {
        let engines = std::mem::take(&mut self.engines);
        let count = engines.len();
        for mut engine in engines {
            engine.close();
            self.storage.purge(&engine.identity().namespace()).await?;
        }
        Ok(count)
    }

    /// Delete the merged store (both tiers). Irreversible.
    pub async fn purge_merged(&mut self) -> Result<(), StoreError> {
        self.shared = None;
        self.storage.purge(&pool_namespace()).await
    }
}

fn report(engine: &FeedEngine, outcome: Result<CycleOutcome, String>) -> EngineReport {
    EngineReport {
        url: engine.subscription().url.clone(),
        identity: engine.identity().clone(),
        status: engine.revalidation().status,
        outcome,
    }
}
