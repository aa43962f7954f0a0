use std::any::Any;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use livequery_core::{CacheConfig, LiveQueryError, ObserverRegistry, Result};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::lifetime::ErasedEntry;
use crate::{
    CacheEntry, Diagnostic, EntryKey, Query, RecomputeScheduler, SchedulerStats, Subscription,
};

type WeakEntry = Weak<dyn Any + Send + Sync>;

/// Reactive query cache.
///
/// Keeps one entry per (query id, watched tables). Entries are found
/// through weak references only: an entry nobody subscribes to is
/// reclaimed, and the next subscription builds a fresh one.
pub struct QueryCache {
    scheduler: Arc<RecomputeScheduler>,
    entries: DashMap<EntryKey, WeakEntry>,
}

impl QueryCache {
    /// Create a cache on the current tokio runtime.
    pub fn new(registry: Arc<dyn ObserverRegistry>, config: CacheConfig) -> Result<Self> {
        let runtime =
            Handle::try_current().map_err(|e| LiveQueryError::NoRuntime(e.to_string()))?;
        Self::with_runtime(registry, config, runtime)
    }

    pub fn with_runtime(
        registry: Arc<dyn ObserverRegistry>,
        config: CacheConfig,
        runtime: Handle,
    ) -> Result<Self> {
        let scheduler = RecomputeScheduler::new(registry, config, runtime)?;
        info!(
            "Query cache ready (max_retries={}, retry_delay={:?})",
            scheduler.config().retry.max_retries,
            scheduler.config().retry.delay()
        );
        Ok(Self {
            scheduler: Arc::new(scheduler),
            entries: DashMap::new(),
        })
    }

    /// Attach a subscriber to the entry for `query`, creating the entry if
    /// no live one exists. The first subscriber triggers a computation.
    pub fn subscribe<T>(&self, query: Query<T>) -> Result<Subscription<T>>
    where
        T: Send + Sync + 'static,
    {
        if self.scheduler.is_shut_down() {
            return Err(LiveQueryError::ShutDown);
        }
        self.prune_released();

        let key = query.key();
        let entry = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut slot) => match slot.get().upgrade() {
                Some(existing) => Self::downcast(existing, &key)?,
                None => {
                    let entry = self.scheduler.create_entry(query)?;
                    slot.insert(Self::erase(&entry));
                    entry
                }
            },
            Entry::Vacant(slot) => {
                let entry = self.scheduler.create_entry(query)?;
                slot.insert(Self::erase(&entry));
                entry
            }
        };

        let subscription = Subscription::attach(&entry);
        debug!(
            entry = %entry.id(),
            subscribers = entry.subscriber_count(),
            "Subscribed to {}",
            key
        );
        Ok(subscription)
    }

    pub fn unsubscribe<T>(&self, subscription: Subscription<T>)
    where
        T: Send + Sync + 'static,
    {
        subscription.unsubscribe();
    }

    /// Whether a live entry exists for `key`, active or not.
    pub fn is_cached(&self, key: &EntryKey) -> bool {
        self.entries
            .get(key)
            .map_or(false, |weak| weak.strong_count() > 0)
    }

    /// Entries currently alive.
    pub fn cached_entries(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| slot.value().strong_count() > 0)
            .count()
    }

    /// Entries with at least one subscriber.
    pub fn active_entries(&self) -> usize {
        self.scheduler.lifetime().len()
    }

    /// Drop bookkeeping for reclaimed entries. Returns how many were removed.
    pub fn prune_released(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before.saturating_sub(self.entries.len())
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.scheduler.diagnostics().subscribe()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn config(&self) -> &CacheConfig {
        self.scheduler.config()
    }

    pub fn scheduler(&self) -> &Arc<RecomputeScheduler> {
        &self.scheduler
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.scheduler.is_shut_down()
    }

    fn erase<T>(entry: &Arc<CacheEntry<T>>) -> WeakEntry
    where
        T: Send + Sync + 'static,
    {
        let erased: ErasedEntry = entry.clone();
        Arc::downgrade(&erased)
    }

    fn downcast<T>(existing: ErasedEntry, key: &EntryKey) -> Result<Arc<CacheEntry<T>>>
    where
        T: Send + Sync + 'static,
    {
        existing
            .downcast::<CacheEntry<T>>()
            .map_err(|_| LiveQueryError::TypeMismatch {
                query: key.query.to_string(),
            })
    }
}

impl Drop for QueryCache {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}
