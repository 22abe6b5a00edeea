use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::models::feedback::PendingItem;

/// FIFO of feedback awaiting analysis. Owned by the scheduler and never
/// exposed; the lock is never held across an `.await`.
#[derive(Debug, Default)]
pub struct Backlog {
    items: Mutex<Vec<PendingItem>>,
}

impl Backlog {
    fn lock(&self) -> MutexGuard<'_, Vec<PendingItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an item unless one with the same id is already waiting.
    /// Returns whether the item was added.
    pub fn push(&self, item: PendingItem) -> bool {
        let mut items = self.lock();
        if items.iter().any(|existing| existing.id == item.id) {
            return false;
        }
        items.push(item);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current contents in arrival order, for planning outside the lock.
    pub fn snapshot(&self) -> Vec<PendingItem> {
        self.lock().clone()
    }

    /// Removes exactly the items whose ids are in `ids`, by identity.
    /// Items appended since `snapshot` was taken are unaffected.
    pub fn remove_ids(&self, ids: &HashSet<Uuid>) -> usize {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|item| !ids.contains(&item.id));
        before - items.len()
    }

    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let count = items.len();
        items.clear();
        count
    }
}
