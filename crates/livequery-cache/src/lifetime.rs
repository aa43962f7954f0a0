use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::EntryId;

pub(crate) type ErasedEntry = Arc<dyn Any + Send + Sync>;

/// Strong owner of active cache entries.
///
/// While an entry has subscribers this container holds the only strong
/// reference that keeps it alive; subscription handles, observers and
/// workers only keep weak references. Releasing an entry makes it
/// reclaimable as soon as any in-flight work on it completes.
#[derive(Default)]
pub struct LifetimeContainer {
    held: DashMap<EntryId, ErasedEntry>,
}

impl LifetimeContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take strong ownership. Returns false if the entry was already held.
    pub fn hold(&self, id: EntryId, entry: ErasedEntry) -> bool {
        let newly_held = self.held.insert(id, entry).is_none();
        if newly_held {
            debug!("Holding cache entry {}", id);
        }
        newly_held
    }

    /// Drop strong ownership. Returns false if the entry was not held.
    pub fn release(&self, id: EntryId) -> bool {
        // The removed Arc is dropped here, after the shard lock is gone.
        let released = self.held.remove(&id).is_some();
        if released {
            debug!("Released cache entry {}", id);
        }
        released
    }

    pub fn is_held(&self, id: EntryId) -> bool {
        self.held.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_and_release_control_reachability() {
        let container = LifetimeContainer::new();
        let id = EntryId::new();
        let value: ErasedEntry = Arc::new(42u32);
        let weak = Arc::downgrade(&value);

        assert!(container.hold(id, value));
        assert!(container.is_held(id));
        assert!(weak.upgrade().is_some());

        assert!(container.release(id));
        assert!(!container.is_held(id));
        assert!(weak.upgrade().is_none());
        assert!(container.is_empty());
    }

    #[test]
    fn hold_and_release_are_idempotent() {
        let container = LifetimeContainer::new();
        let id = EntryId::new();
        let value: ErasedEntry = Arc::new("entry");

        assert!(container.hold(id, value.clone()));
        assert!(!container.hold(id, value));
        assert_eq!(container.len(), 1);

        assert!(container.release(id));
        assert!(!container.release(id));
    }
}
