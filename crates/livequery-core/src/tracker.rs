use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::TableSet;

/// Identifies one registration with an [`ObserverRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Receives "these tables changed" events.
pub trait TableObserver: Send + Sync {
    fn on_tables_changed(&self, changed: &TableSet);
}

/// Registration side of a change-notification source.
///
/// Implementations must hold observers weakly: a registration records a
/// relation for lookup and never keeps the observer alive.
pub trait ObserverRegistry: Send + Sync {
    fn register_observer(&self, tables: TableSet, observer: Weak<dyn TableObserver>) -> ObserverId;

    /// Returns false when the id was not (or no longer) registered.
    fn unregister_observer(&self, id: ObserverId) -> bool;
}

struct Registration {
    tables: TableSet,
    observer: Weak<dyn TableObserver>,
}

/// In-process table change registry.
///
/// Maps observers to the tables they watch and fans out commit
/// notifications to every live observer whose watched set intersects the
/// changed set. Registrations whose observer has been dropped are pruned
/// on the next `notify`.
pub struct InvalidationTracker {
    registrations: RwLock<HashMap<ObserverId, Registration>>,
    next_id: AtomicU64,
}

impl Default for InvalidationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationTracker {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Deliver a commit's changed tables. Returns how many observers were notified.
    pub fn notify(&self, changed: &TableSet) -> usize {
        if changed.is_empty() {
            return 0;
        }

        // Collect under the read lock, deliver outside it: observers may
        // re-enter the tracker (e.g. unregister) from their callback.
        let mut targets = Vec::new();
        let mut dead = Vec::new();
        {
            let registrations = self.registrations.read();
            for (id, reg) in registrations.iter() {
                if !reg.tables.intersects(changed) {
                    continue;
                }
                match reg.observer.upgrade() {
                    Some(observer) => targets.push(observer),
                    None => dead.push(*id),
                }
            }
        }

        if !dead.is_empty() {
            let mut registrations = self.registrations.write();
            for id in &dead {
                registrations.remove(id);
            }
            debug!("Pruned {} dead observer registrations", dead.len());
        }

        trace!("Notifying {} observers of change to {}", targets.len(), changed);
        for observer in &targets {
            observer.on_tables_changed(changed);
        }
        targets.len()
    }

    /// Number of registrations, including ones whose observer is gone but not yet pruned.
    pub fn observer_count(&self) -> usize {
        self.registrations.read().len()
    }

    /// Number of registrations whose observer is still alive.
    pub fn live_observer_count(&self) -> usize {
        self.registrations
            .read()
            .values()
            .filter(|reg| reg.observer.strong_count() > 0)
            .count()
    }

    pub fn is_registered(&self, id: ObserverId) -> bool {
        self.registrations.read().contains_key(&id)
    }
}

impl ObserverRegistry for InvalidationTracker {
    fn register_observer(&self, tables: TableSet, observer: Weak<dyn TableObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("Registering {} for tables {}", id, tables);
        self.registrations
            .write()
            .insert(id, Registration { tables, observer });
        id
    }

    fn unregister_observer(&self, id: ObserverId) -> bool {
        let removed = self.registrations.write().remove(&id).is_some();
        if removed {
            debug!("Unregistered {}", id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingObserver {
        calls: AtomicUsize,
    }

    impl CountingObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl TableObserver for CountingObserver {
        fn on_tables_changed(&self, _changed: &TableSet) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn weak(observer: &Arc<CountingObserver>) -> Weak<dyn TableObserver> {
        let observer: Arc<dyn TableObserver> = observer.clone();
        Arc::downgrade(&observer)
    }

    #[test]
    fn notifies_only_intersecting_observers() {
        let tracker = InvalidationTracker::new();
        let messages = CountingObserver::new();
        let folders = CountingObserver::new();
        tracker.register_observer(TableSet::from(["message"]), weak(&messages));
        tracker.register_observer(TableSet::from(["folder"]), weak(&folders));

        let delivered = tracker.notify(&TableSet::from(["message", "identity"]));

        assert_eq!(delivered, 1);
        assert_eq!(messages.calls.load(Ordering::SeqCst), 1);
        assert_eq!(folders.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registration_does_not_keep_observer_alive() {
        let tracker = InvalidationTracker::new();
        let observer = CountingObserver::new();
        tracker.register_observer(TableSet::from(["message"]), weak(&observer));
        assert_eq!(tracker.live_observer_count(), 1);

        drop(observer);
        assert_eq!(tracker.live_observer_count(), 0);
        assert_eq!(tracker.observer_count(), 1);

        assert_eq!(tracker.notify(&TableSet::from(["message"])), 0);
        assert_eq!(tracker.observer_count(), 0);
    }

    #[test]
    fn unregister_stops_delivery() {
        let tracker = InvalidationTracker::new();
        let observer = CountingObserver::new();
        let id = tracker.register_observer(TableSet::from(["message"]), weak(&observer));

        assert!(tracker.unregister_observer(id));
        assert!(!tracker.unregister_observer(id));
        tracker.notify(&TableSet::from(["message"]));
        assert_eq!(observer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_change_set_is_ignored() {
        let tracker = InvalidationTracker::new();
        let observer = CountingObserver::new();
        tracker.register_observer(TableSet::from(["message"]), weak(&observer));
        assert_eq!(tracker.notify(&TableSet::new()), 0);
    }
}
