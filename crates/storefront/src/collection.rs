//! Copy-on-write shared collections.

use std::sync::Arc;

use tokio::sync::watch;

/// A vector shared between tasks.
///
/// Every mutation builds a new vector under the channel's lock, so mutations
/// are applied one at a time in call order and readers only ever see whole
/// snapshots. Cloning shares the underlying channel.
#[derive(Debug)]
pub struct SharedVec<T> {
    tx: Arc<watch::Sender<Arc<Vec<T>>>>,
}

impl<T> Clone for SharedVec<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> Default for SharedVec<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T> SharedVec<T> {
    #[must_use]
    pub fn new(initial: Vec<T>) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// The current contents.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.tx.borrow())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Replace the contents.
    pub fn replace(&self, items: Vec<T>) {
        self.tx.send_replace(Arc::new(items));
    }

    /// Replace the contents with `f(current)`.
    pub fn apply(&self, f: impl FnOnce(&[T]) -> Vec<T>) {
        let _ = self.update(f);
    }

    /// Like [`apply`](Self::apply), returning the contents it published.
    #[must_use]
    pub fn update(&self, f: impl FnOnce(&[T]) -> Vec<T>) -> Arc<Vec<T>> {
        let mut published = Arc::default();
        self.tx.send_modify(|current| {
            *current = Arc::new(f(current));
            published = Arc::clone(current);
        });
        published
    }

    /// Like [`apply`](Self::apply), but `f` may decline to change anything by
    /// returning `None`, in which case watchers are not notified.
    pub fn apply_if(&self, f: impl FnOnce(&[T]) -> Option<Vec<T>>) -> bool {
        self.tx.send_if_modified(|current| match f(current) {
            Some(next) => {
                *current = Arc::new(next);
                true
            }
            None => false,
        })
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    /// Subscribe to changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<Vec<T>>> {
        self.tx.subscribe()
    }
}
