use std::sync::atomic::{AtomicU64, Ordering};

/// Scheduler counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// 0 -> 1 subscriber transitions
    pub activations: u64,
    /// Invalidations accepted for active entries
    pub invalidations: u64,
    /// Invalidations dropped because the entry had no subscribers
    pub ignored_invalidations: u64,
    /// Worker tasks that deferred to a later queued task
    pub coalesced: u64,
    /// Recomputes that ran the compute function (with retries)
    pub computations: u64,
    /// Individual compute function invocations
    pub attempts: u64,
    pub retries: u64,
    pub publishes: u64,
    pub exhausted: u64,
    pub underflows: u64,
    /// Queued tasks dropped because the entry became inactive
    pub skipped_inactive: u64,
    /// Recomputes interrupted by shutdown
    pub cancelled: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    pub activations: AtomicU64,
    pub invalidations: AtomicU64,
    pub ignored_invalidations: AtomicU64,
    pub coalesced: AtomicU64,
    pub computations: AtomicU64,
    pub attempts: AtomicU64,
    pub retries: AtomicU64,
    pub publishes: AtomicU64,
    pub exhausted: AtomicU64,
    pub underflows: AtomicU64,
    pub skipped_inactive: AtomicU64,
    pub cancelled: AtomicU64,
}

impl StatsRecorder {
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SchedulerStats {
            activations: load(&self.activations),
            invalidations: load(&self.invalidations),
            ignored_invalidations: load(&self.ignored_invalidations),
            coalesced: load(&self.coalesced),
            computations: load(&self.computations),
            attempts: load(&self.attempts),
            retries: load(&self.retries),
            publishes: load(&self.publishes),
            exhausted: load(&self.exhausted),
            underflows: load(&self.underflows),
            skipped_inactive: load(&self.skipped_inactive),
            cancelled: load(&self.cancelled),
        }
    }
}
