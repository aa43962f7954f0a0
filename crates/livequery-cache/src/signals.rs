//! Pending recompute obligations for one cache entry.
//!
//! Every activation or invalidation calls [`PendingSignals::signal`] and
//! enqueues one task on the entry's serialized worker. Each task calls
//! [`PendingSignals::discharge`]: only the task that brings the count back
//! to zero computes, every earlier one in the burst is coalesced away.
//!
//! Count and "compute running" flag share one atomic word so the phase can
//! be read consistently without a lock.

use std::sync::atomic::{AtomicU64, Ordering};

const RUNNING: u64 = 1 << 63;
const COUNT_MASK: u64 = RUNNING - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputePhase {
    /// Nothing queued, nothing running.
    Idle,
    /// Tasks queued, no computation running.
    ComputePending,
    /// A computation is running and nothing is queued behind it.
    Computing,
    /// A computation is running and at least one signal arrived after it began.
    ComputeRunningWithQueuedFollowup,
}

/// What a worker task should do after discharging its obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discharge {
    /// Later tasks are still queued; they will observe newer state.
    Coalesced { remaining: u64 },
    /// Last task of the burst: compute and publish.
    Run,
    /// No obligation was outstanding. The count stays at zero and the
    /// caller proceeds as for `Run`.
    Underflow,
}

#[derive(Debug, Default)]
pub struct PendingSignals {
    state: AtomicU64,
}

impl PendingSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one recompute obligation. Returns the pending count after it.
    pub fn signal(&self) -> u64 {
        let prev = self.state.fetch_add(1, Ordering::AcqRel);
        (prev & COUNT_MASK) + 1
    }

    /// Discharge one obligation. Saturates at zero: the count is never
    /// stored below it.
    pub fn discharge(&self) -> Discharge {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let count = current & COUNT_MASK;
            if count == 0 {
                return Discharge::Underflow;
            }
            match self.state.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) if count > 1 => {
                    return Discharge::Coalesced {
                        remaining: count - 1,
                    }
                }
                Ok(_) => return Discharge::Run,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn begin_compute(&self) {
        self.state.fetch_or(RUNNING, Ordering::AcqRel);
    }

    pub fn end_compute(&self) {
        self.state.fetch_and(COUNT_MASK, Ordering::AcqRel);
    }

    pub fn pending(&self) -> u64 {
        self.state.load(Ordering::Acquire) & COUNT_MASK
    }

    pub fn is_computing(&self) -> bool {
        self.state.load(Ordering::Acquire) & RUNNING != 0
    }

    pub fn phase(&self) -> RecomputePhase {
        let state = self.state.load(Ordering::Acquire);
        let pending = state & COUNT_MASK;
        match (state & RUNNING != 0, pending) {
            (false, 0) => RecomputePhase::Idle,
            (false, _) => RecomputePhase::ComputePending,
            (true, 0) => RecomputePhase::Computing,
            (true, _) => RecomputePhase::ComputeRunningWithQueuedFollowup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_signal_runs() {
        let signals = PendingSignals::new();
        assert_eq!(signals.signal(), 1);
        assert_eq!(signals.phase(), RecomputePhase::ComputePending);
        assert_eq!(signals.discharge(), Discharge::Run);
        assert_eq!(signals.phase(), RecomputePhase::Idle);
    }

    #[test]
    fn burst_runs_only_on_last_discharge() {
        let signals = PendingSignals::new();
        for _ in 0..4 {
            signals.signal();
        }
        assert_eq!(signals.discharge(), Discharge::Coalesced { remaining: 3 });
        assert_eq!(signals.discharge(), Discharge::Coalesced { remaining: 2 });
        assert_eq!(signals.discharge(), Discharge::Coalesced { remaining: 1 });
        assert_eq!(signals.discharge(), Discharge::Run);
        assert_eq!(signals.pending(), 0);
    }

    #[test]
    fn extra_discharge_saturates_at_zero() {
        let signals = PendingSignals::new();
        signals.signal();
        assert_eq!(signals.discharge(), Discharge::Run);
        assert_eq!(signals.discharge(), Discharge::Underflow);
        assert_eq!(signals.pending(), 0);

        // Accounting is unaffected afterwards.
        signals.signal();
        signals.signal();
        assert_eq!(signals.discharge(), Discharge::Coalesced { remaining: 1 });
        assert_eq!(signals.discharge(), Discharge::Run);
    }

    #[test]
    fn phases_track_running_flag() {
        let signals = PendingSignals::new();
        signals.signal();
        assert_eq!(signals.discharge(), Discharge::Run);
        signals.begin_compute();
        assert!(signals.is_computing());
        assert_eq!(signals.phase(), RecomputePhase::Computing);

        signals.signal();
        assert_eq!(
            signals.phase(),
            RecomputePhase::ComputeRunningWithQueuedFollowup
        );

        signals.end_compute();
        assert_eq!(signals.phase(), RecomputePhase::ComputePending);
        assert_eq!(signals.pending(), 1);
    }

    #[test]
    fn running_flag_survives_discharge() {
        let signals = PendingSignals::new();
        signals.begin_compute();
        signals.signal();
        signals.signal();
        assert_eq!(signals.discharge(), Discharge::Coalesced { remaining: 1 });
        assert!(signals.is_computing());
        assert_eq!(signals.discharge(), Discharge::Run);
        assert_eq!(signals.discharge(), Discharge::Underflow);
        assert!(signals.is_computing());
    }

    #[test]
    fn concurrent_signals_are_all_counted() {
        let signals = Arc::new(PendingSignals::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let signals = signals.clone();
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        signals.signal();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(signals.pending(), 8_000);

        let mut runs = 0;
        for _ in 0..8_000 {
            if signals.discharge() == Discharge::Run {
                runs += 1;
            }
        }
        assert_eq!(runs, 1);
    }
}
