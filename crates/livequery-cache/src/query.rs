use std::fmt;
use std::sync::Arc;

use livequery_core::TableSet;

/// Identity of a compute function.
///
/// Closures have no usable identity of their own, so callers name them.
/// Two queries with the same id share one compute lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(Arc<str>);

impl QueryId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for QueryId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Zero-argument recomputation. Runs on a blocking worker thread and must
/// re-read live state on every call.
pub type ComputeFn<T> = dyn Fn() -> anyhow::Result<T> + Send + Sync;

/// Key of a cache entry: one entry per (compute function, watched tables).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub query: QueryId,
    pub tables: TableSet,
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.query, self.tables)
    }
}

/// A subscription request: what to compute and which tables invalidate it.
pub struct Query<T> {
    id: QueryId,
    tables: TableSet,
    compute: Arc<ComputeFn<T>>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            tables: self.tables.clone(),
            compute: self.compute.clone(),
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}

impl<T> Query<T> {
    pub fn new<F>(id: impl Into<QueryId>, tables: impl Into<TableSet>, compute: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            tables: tables.into(),
            compute: Arc::new(compute),
        }
    }

    pub fn id(&self) -> &QueryId {
        &self.id
    }

    pub fn tables(&self) -> &TableSet {
        &self.tables
    }

    pub fn key(&self) -> EntryKey {
        EntryKey {
            query: self.id.clone(),
            tables: self.tables.clone(),
        }
    }

    pub(crate) fn compute_fn(&self) -> Arc<ComputeFn<T>> {
        self.compute.clone()
    }
}
