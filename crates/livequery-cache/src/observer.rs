use std::sync::Weak;

use livequery_core::{TableObserver, TableSet};
use tracing::trace;

use crate::CacheEntry;

/// Bridges tracker notifications into scheduler invalidations.
///
/// Owned by its entry; the tracker only sees a weak reference and the
/// observer only points back weakly, so neither keeps the entry alive.
pub struct EntryObserver<T> {
    entry: Weak<CacheEntry<T>>,
    tables: TableSet,
}

impl<T> EntryObserver<T> {
    pub(crate) fn new(entry: Weak<CacheEntry<T>>, tables: TableSet) -> Self {
        Self { entry, tables }
    }

    pub fn tables(&self) -> &TableSet {
        &self.tables
    }
}

impl<T> TableObserver for EntryObserver<T>
where
    T: Send + Sync + 'static,
{
    fn on_tables_changed(&self, changed: &TableSet) {
        if !self.tables.intersects(changed) {
            return;
        }
        match self.entry.upgrade() {
            Some(entry) => entry.scheduler().on_invalidated(&entry, changed),
            None => trace!("Dropping change to {} for reclaimed entry", changed),
        }
    }
}
