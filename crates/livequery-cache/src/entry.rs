use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use livequery_core::{ObserverId, TableObserver, TableSet};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

use crate::lifetime::ErasedEntry;
use crate::{
    DiagnosticKind, EntryKey, EntryObserver, PendingSignals, Query, RecomputePhase,
    RecomputeScheduler,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unit of work on an entry's serialized worker queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerTask {
    Recompute,
}

/// One cached query result and the scheduling state around it.
pub struct CacheEntry<T> {
    id: EntryId,
    query: Query<T>,
    value: watch::Sender<Option<Arc<T>>>,
    subscribers: AtomicUsize,
    pub(crate) signals: PendingSignals,
    registered: AtomicBool,
    /// Guards the registration handshake with the observer registry.
    registration: Mutex<Option<ObserverId>>,
    /// Serializes lifetime reconciliation on 0 <-> 1 subscriber crossings.
    transition: Mutex<()>,
    observer: Arc<EntryObserver<T>>,
    tasks: mpsc::UnboundedSender<WorkerTask>,
    scheduler: Arc<RecomputeScheduler>,
}

impl<T> fmt::Debug for CacheEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("subscribers", &self.subscriber_count())
            .field("phase", &self.signals.phase())
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl<T> CacheEntry<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(
        query: Query<T>,
        scheduler: Arc<RecomputeScheduler>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<WorkerTask>) {
        let (tasks, rx) = mpsc::unbounded_channel();
        let (value, _) = watch::channel(None);
        let entry = Arc::new_cyclic(|weak| {
            let observer = Arc::new(EntryObserver::new(weak.clone(), query.tables().clone()));
            Self {
                id: EntryId::new(),
                query,
                value,
                subscribers: AtomicUsize::new(0),
                signals: PendingSignals::new(),
                registered: AtomicBool::new(false),
                registration: Mutex::new(None),
                transition: Mutex::new(()),
                observer,
                tasks,
                scheduler,
            }
        });
        (entry, rx)
    }

    /// Add a subscriber. The first one makes the entry active: strongly held
    /// by the lifetime container and scheduled for an initial recompute.
    pub fn attach(self: &Arc<Self>) {
        let prev = self.subscribers.fetch_add(1, Ordering::AcqRel);
        debug!(entry = %self.id, subscribers = prev + 1, "Subscriber attached");
        if prev == 0 {
            self.reconcile_lifetime();
            self.scheduler.on_activate(self);
        }
    }

    /// Remove a subscriber. The count saturates at zero; an unmatched
    /// detach is reported and otherwise ignored.
    pub fn detach(self: &Arc<Self>) {
        let mut current = self.subscribers.load(Ordering::Acquire);
        loop {
            if current == 0 {
                self.scheduler.report(
                    self.query.id(),
                    self.id,
                    DiagnosticKind::DetachWithoutAttach,
                );
                return;
            }
            match self.subscribers.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        debug!(entry = %self.id, subscribers = current - 1, "Subscriber detached");
        if current == 1 {
            self.reconcile_lifetime();
        }
    }

    /// Bring lifetime ownership and registration in line with the current
    /// subscriber count. Racing crossings both reconcile; the last one to
    /// take the lock sees the final count.
    fn reconcile_lifetime(self: &Arc<Self>) {
        let _guard = self.transition.lock();
        if self.is_active() {
            let erased: ErasedEntry = self.clone();
            self.scheduler.lifetime().hold(self.id, erased);
        } else {
            self.scheduler.lifetime().release(self.id);
            self.unregister_observer();
        }
    }

    /// Register the observer with the change source, once per activation
    /// cycle. Returns true if this call performed the registration.
    pub(crate) fn ensure_registered(&self) -> bool {
        let mut registration = self.registration.lock();
        if !self.is_active() {
            return false;
        }
        if self
            .registered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let observer: Arc<dyn TableObserver> = self.observer.clone();
        let id = self
            .scheduler
            .registry()
            .register_observer(self.query.tables().clone(), Arc::downgrade(&observer));
        *registration = Some(id);
        debug!(entry = %self.id, observer = %id, "Observer registered for {}", self.query.tables());
        true
    }

    pub(crate) fn publish(&self, value: T) {
        self.value.send_replace(Some(Arc::new(value)));
    }

    pub(crate) fn subscribe_values(&self) -> watch::Receiver<Option<Arc<T>>> {
        self.value.subscribe()
    }
}

impl<T> CacheEntry<T> {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn query(&self) -> &Query<T> {
        &self.query
    }

    pub fn key(&self) -> EntryKey {
        self.query.key()
    }

    pub fn tables(&self) -> &TableSet {
        self.query.tables()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.subscriber_count() > 0
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> RecomputePhase {
        self.signals.phase()
    }

    pub fn pending_signals(&self) -> u64 {
        self.signals.pending()
    }

    /// Last published value, if any computation has succeeded yet.
    pub fn current(&self) -> Option<Arc<T>> {
        self.value.borrow().clone()
    }

    pub(crate) fn enqueue(&self, task: WorkerTask) -> bool {
        self.tasks.send(task).is_ok()
    }

    pub(crate) fn scheduler(&self) -> &Arc<RecomputeScheduler> {
        &self.scheduler
    }

    fn unregister_observer(&self) {
        let mut registration = self.registration.lock();
        if self.registered.swap(false, Ordering::AcqRel) {
            if let Some(id) = registration.take() {
                self.scheduler.registry().unregister_observer(id);
                debug!(entry = %self.id, observer = %id, "Observer unregistered");
            }
        }
    }
}

impl<T> Drop for CacheEntry<T> {
    fn drop(&mut self) {
        if let Some(id) = self.registration.get_mut().take() {
            self.scheduler.registry().unregister_observer(id);
        }
        debug!(entry = %self.id, "Cache entry reclaimed");
    }
}
