//! Reactive query cache.
//!
//! A [`QueryCache`] keeps the result of a compute function up to date as
//! the tables it reads change. Notifications arrive through an
//! [`ObserverRegistry`](livequery_core::ObserverRegistry); bursts of them
//! are coalesced by the [`RecomputeScheduler`] into one recompute per
//! burst, failed computations are retried, and entries live exactly as
//! long as they have subscribers.

pub mod cache;
pub mod diagnostics;
pub mod entry;
pub mod lifetime;
pub mod observer;
pub mod query;
pub mod retry;
pub mod scheduler;
pub mod signals;
pub mod stats;
pub mod subscription;

pub use cache::*;
pub use diagnostics::*;
pub use entry::{CacheEntry, EntryId};
pub use lifetime::*;
pub use observer::*;
pub use query::*;
pub use retry::{run_with_retry, ComputeLocks, RetryOutcome};
pub use scheduler::*;
pub use signals::*;
pub use stats::SchedulerStats;
pub use subscription::*;

// Re-export common types for convenience
pub use livequery_core::{
    CacheConfig, InvalidationTracker, LiveQueryError, ObserverId, ObserverRegistry, Result,
    RetryConfig, SchedulerConfig, TableObserver, TableSet,
};
