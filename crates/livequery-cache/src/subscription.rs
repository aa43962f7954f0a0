use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};

use crate::{CacheEntry, EntryId, EntryKey};

/// A live subscriber of one cache entry.
///
/// Holds only a weak reference to the entry; the lifetime container keeps
/// it alive while any subscription is attached. Dropping the handle
/// detaches it.
pub struct Subscription<T>
where
    T: Send + Sync + 'static,
{
    entry: Weak<CacheEntry<T>>,
    entry_id: EntryId,
    key: EntryKey,
    rx: watch::Receiver<Option<Arc<T>>>,
    attached: bool,
}

impl<T> Subscription<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn attach(entry: &Arc<CacheEntry<T>>) -> Self {
        let rx = entry.subscribe_values();
        entry.attach();
        Self {
            entry: Arc::downgrade(entry),
            entry_id: entry.id(),
            key: entry.key(),
            rx,
            attached: true,
        }
    }

    /// Most recently published value.
    pub fn current(&self) -> Option<Arc<T>> {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish. Returns `None` once the entry is gone.
    pub async fn changed(&mut self) -> Option<Arc<T>> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }

    /// Wait until a published value satisfies `pred`, checking the current
    /// value first. Returns `None` once the entry is gone.
    pub async fn wait_for<F>(&mut self, mut pred: F) -> Option<Arc<T>>
    where
        F: FnMut(&T) -> bool,
    {
        let value = self
            .rx
            .wait_for(|v| v.as_deref().map_or(false, &mut pred))
            .await
            .ok()?;
        value.clone()
    }

    /// The current value (if any) followed by every later publish.
    pub fn stream(&self) -> impl Stream<Item = Arc<T>> {
        WatchStream::new(self.rx.clone()).filter_map(|v| v)
    }

    pub fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    pub fn key(&self) -> &EntryKey {
        &self.key
    }

    /// Detach explicitly. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !std::mem::replace(&mut self.attached, false) {
            return;
        }
        if let Some(entry) = self.entry.upgrade() {
            entry.detach();
        }
    }
}

impl<T> fmt::Debug for Subscription<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("entry_id", &self.entry_id)
            .field("key", &self.key)
            .field("attached", &self.attached)
            .finish()
    }
}

impl<T> Drop for Subscription<T>
where
    T: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.detach();
    }
}
