use std::sync::Arc;

use anyhow::anyhow;
use dashmap::DashMap;
use livequery_core::RetryConfig;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ComputeFn, QueryId};

/// Exclusive locks keyed by compute function identity.
///
/// A recompute holds its query's lock for the whole attempt/retry loop, so
/// a retry pause blocks only workers computing the same query. Locks are
/// released once no worker holds them, so the table tracks only queries
/// with a recompute in progress.
#[derive(Default)]
pub struct ComputeLocks {
    locks: DashMap<QueryId, Arc<Mutex<()>>>,
}

impl ComputeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, query: &QueryId) -> Arc<Mutex<()>> {
        self.locks.entry(query.clone()).or_default().clone()
    }

    /// Drop the lock for `query` if nobody else holds or awaits it.
    pub fn release(&self, query: &QueryId) -> bool {
        self.locks
            .remove_if(query, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T> {
    Computed { value: T, attempts: u32 },
    Exhausted { attempts: u32, error: anyhow::Error },
    /// Shutdown interrupted the pause between attempts.
    Cancelled { attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Computed { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `compute` on the blocking pool, retrying failures with a fixed
/// pause. A panic inside `compute` counts as a failed attempt.
pub async fn run_with_retry<T>(
    query: &QueryId,
    compute: &Arc<ComputeFn<T>>,
    policy: &RetryConfig,
    shutdown: &CancellationToken,
) -> RetryOutcome<T>
where
    T: Send + 'static,
{
    let max_attempts = policy.max_attempts();
    let delay = policy.delay();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let f = compute.clone();
        let result = match tokio::task::spawn_blocking(move || f()).await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow!("compute task failed: {}", join_err)),
        };

        let error = match result {
            Ok(value) => return RetryOutcome::Computed { value, attempts },
            Err(error) => error,
        };

        if attempts >= max_attempts {
            return RetryOutcome::Exhausted { attempts, error };
        }

        warn!(
            query = %query,
            attempt = attempts,
            "Compute failed, retrying in {:?}: {:#}",
            delay, error
        );
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(query = %query, "Retry interrupted by shutdown");
                return RetryOutcome::Cancelled { attempts };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    fn policy(max_retries: u32, delay_ms: u64) -> RetryConfig {
        RetryConfig {
            max_retries,
            retry_delay_ms: delay_ms,
        }
    }

    fn failing_times(failures: u32, calls: Arc<AtomicU32>) -> Arc<ComputeFn<u32>> {
        Arc::new(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                Err(anyhow!("attempt {} failed", n))
            } else {
                Ok(n)
            }
        })
    }

    #[tokio::test]
    async fn first_success_needs_no_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let compute = failing_times(0, calls.clone());
        let outcome = run_with_retry(
            &QueryId::new("q"),
            &compute,
            &policy(5, 10),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, RetryOutcome::Computed { value: 1, attempts: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_failures_with_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let compute = failing_times(3, calls.clone());
        let started = Instant::now();
        let outcome = run_with_retry(
            &QueryId::new("q"),
            &compute,
            &policy(5, 20),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, RetryOutcome::Computed { value: 4, attempts: 4 }));
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let compute = failing_times(u32::MAX, calls.clone());
        let outcome = run_with_retry(
            &QueryId::new("q"),
            &compute,
            &policy(5, 1),
            &CancellationToken::new(),
        )
        .await;

        match outcome {
            RetryOutcome::Exhausted { attempts, error } => {
                assert_eq!(attempts, 6);
                assert!(error.to_string().contains("attempt 6"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn panic_counts_as_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let compute: Arc<ComputeFn<u32>> = Arc::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("storage engine exploded");
            }
            Ok(7)
        });
        let outcome = run_with_retry(
            &QueryId::new("q"),
            &compute,
            &policy(1, 1),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, RetryOutcome::Computed { value: 7, attempts: 2 }));
    }

    #[tokio::test]
    async fn shutdown_interrupts_pause() {
        let calls = Arc::new(AtomicU32::new(0));
        let compute = failing_times(u32::MAX, calls.clone());
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = run_with_retry(
            &QueryId::new("q"),
            &compute,
            &policy(5, 60_000),
            &shutdown,
        )
        .await;

        assert!(matches!(outcome, RetryOutcome::Cancelled { attempts: 1 }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn locks_are_shared_per_query() {
        let locks = ComputeLocks::new();
        let a = locks.lock_for(&QueryId::new("a"));
        let a_again = locks.lock_for(&QueryId::new("a"));
        let b = locks.lock_for(&QueryId::new("b"));

        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn release_keeps_locks_still_in_use() {
        let locks = ComputeLocks::new();
        let query = QueryId::new("a");
        let held = locks.lock_for(&query);

        assert!(!locks.release(&query));
        assert_eq!(locks.len(), 1);

        drop(held);
        assert!(locks.release(&query));
        assert!(locks.is_empty());
        assert!(!locks.release(&query));
    }
}
