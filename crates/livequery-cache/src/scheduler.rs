//! Coalescing recompute scheduler.
//!
//! Each entry has one worker task draining an unbounded queue in
//! submission order, so tasks for one entry never overlap while different
//! entries proceed in parallel. Every activation or invalidation adds one
//! pending signal and one queued task; a task only computes when it
//! discharges the last pending signal, which collapses a burst into a
//! single computation that reads the state as of the burst's end. A signal
//! that arrives while a computation runs leaves one more task queued
//! behind it, so no update is lost.

use std::sync::{Arc, Weak};

use livequery_core::{CacheConfig, LiveQueryError, ObserverRegistry, Result, TableSet};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::entry::WorkerTask;
use crate::retry::{run_with_retry, ComputeLocks, RetryOutcome};
use crate::stats::StatsRecorder;
use crate::{
    CacheEntry, Diagnostic, DiagnosticKind, Diagnostics, Discharge, EntryId, LifetimeContainer,
    Query, QueryId, SchedulerStats,
};

pub struct RecomputeScheduler {
    registry: Arc<dyn ObserverRegistry>,
    lifetime: LifetimeContainer,
    locks: ComputeLocks,
    diagnostics: Diagnostics,
    stats: StatsRecorder,
    config: CacheConfig,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl RecomputeScheduler {
    pub fn new(
        registry: Arc<dyn ObserverRegistry>,
        config: CacheConfig,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            lifetime: LifetimeContainer::new(),
            locks: ComputeLocks::new(),
            diagnostics: Diagnostics::new(config.scheduler.diagnostics_capacity),
            stats: StatsRecorder::default(),
            config,
            shutdown: CancellationToken::new(),
            runtime,
        })
    }

    /// Build an entry and start its worker. The entry starts inactive.
    pub fn create_entry<T>(self: &Arc<Self>, query: Query<T>) -> Result<Arc<CacheEntry<T>>>
    where
        T: Send + Sync + 'static,
    {
        if self.is_shut_down() {
            return Err(LiveQueryError::ShutDown);
        }
        let (entry, rx) = CacheEntry::new(query, self.clone());
        debug!(entry = %entry.id(), "Created cache entry for {}", entry.key());
        self.runtime
            .spawn(self.clone().run_worker(Arc::downgrade(&entry), rx));
        Ok(entry)
    }

    /// Subscriber count went 0 -> 1: schedule the initial recompute.
    pub fn on_activate<T>(&self, entry: &CacheEntry<T>) {
        StatsRecorder::incr(&self.stats.activations);
        let pending = entry.signals.signal();
        debug!(entry = %entry.id(), pending, "Entry activated");
        self.submit(entry);
    }

    /// Watched tables changed. Inactive entries are not recomputed.
    pub fn on_invalidated<T>(&self, entry: &CacheEntry<T>, changed: &TableSet) {
        if !entry.is_active() {
            StatsRecorder::incr(&self.stats.ignored_invalidations);
            trace!(entry = %entry.id(), "Ignoring change to {} for inactive entry", changed);
            return;
        }
        StatsRecorder::incr(&self.stats.invalidations);
        let pending = entry.signals.signal();
        trace!(entry = %entry.id(), pending, "Entry invalidated by change to {}", changed);
        self.submit(entry);
    }

    fn submit<T>(&self, entry: &CacheEntry<T>) {
        if !entry.enqueue(WorkerTask::Recompute) {
            debug!(entry = %entry.id(), "Worker gone, recompute not queued");
        }
    }

    async fn run_worker<T>(
        self: Arc<Self>,
        entry: Weak<CacheEntry<T>>,
        mut rx: mpsc::UnboundedReceiver<WorkerTask>,
    ) where
        T: Send + Sync + 'static,
    {
        loop {
            let task = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            // Strong only for the duration of one task.
            let Some(entry) = entry.upgrade() else {
                break;
            };
            match task {
                WorkerTask::Recompute => self.recompute_task(&entry).await,
            }
        }
        trace!("Recompute worker exiting");
    }

    async fn recompute_task<T>(&self, entry: &Arc<CacheEntry<T>>)
    where
        T: Send + Sync + 'static,
    {
        entry.ensure_registered();

        match entry.signals.discharge() {
            Discharge::Coalesced { remaining } => {
                StatsRecorder::incr(&self.stats.coalesced);
                trace!(entry = %entry.id(), remaining, "Recompute deferred to a queued task");
                return;
            }
            Discharge::Run => {}
            Discharge::Underflow => {
                StatsRecorder::incr(&self.stats.underflows);
                self.report(entry.query().id(), entry.id(), DiagnosticKind::CounterUnderflow);
            }
        }

        if !entry.is_active() {
            StatsRecorder::incr(&self.stats.skipped_inactive);
            debug!(entry = %entry.id(), "Entry inactive, skipping recompute");
            return;
        }

        let query = entry.query().id();
        let compute = entry.query().compute_fn();
        let outcome = {
            // Held across every attempt and pause: blocks only this entry's
            // worker and other workers computing the same query.
            let lock = self.locks.lock_for(query);
            let _guard = lock.lock().await;

            entry.signals.begin_compute();
            StatsRecorder::incr(&self.stats.computations);
            let outcome =
                run_with_retry(query, &compute, &self.config.retry, &self.shutdown).await;
            entry.signals.end_compute();
            outcome
        };
        self.locks.release(query);

        let attempts = u64::from(outcome.attempts());
        StatsRecorder::add(&self.stats.attempts, attempts);
        StatsRecorder::add(&self.stats.retries, attempts.saturating_sub(1));

        match outcome {
            RetryOutcome::Computed { attempts, .. } if self.is_shut_down() => {
                StatsRecorder::incr(&self.stats.cancelled);
                debug!(entry = %entry.id(), attempts, "Dropping value computed during shutdown");
            }
            RetryOutcome::Computed { value, attempts } => {
                StatsRecorder::incr(&self.stats.publishes);
                entry.publish(value);
                debug!(entry = %entry.id(), attempts, "Published recomputed value");
            }
            RetryOutcome::Exhausted { attempts, error } => {
                StatsRecorder::incr(&self.stats.exhausted);
                self.report(
                    query,
                    entry.id(),
                    DiagnosticKind::RetriesExhausted {
                        attempts,
                        error: format!("{:#}", error),
                    },
                );
            }
            RetryOutcome::Cancelled { attempts } => {
                StatsRecorder::incr(&self.stats.cancelled);
                debug!(entry = %entry.id(), attempts, "Recompute cancelled by shutdown");
            }
        }
    }

    pub(crate) fn report(&self, query: &QueryId, entry: EntryId, kind: DiagnosticKind) {
        self.diagnostics
            .report(Diagnostic::new(query.clone(), entry, kind));
    }

    /// Stop all workers. A retry pause in progress ends immediately. A
    /// compute call already running finishes, but its value is not published.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(
                "Shutting down recompute scheduler with {} active entries",
                self.lifetime.len()
            );
            self.shutdown.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn registry(&self) -> &Arc<dyn ObserverRegistry> {
        &self.registry
    }

    pub fn lifetime(&self) -> &LifetimeContainer {
        &self.lifetime
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.snapshot()
    }
}
