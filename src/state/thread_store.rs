use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::HandoffError;
use crate::protocol::chatkit::{Page, Thread, ThreadItem, ThreadMetadata};

struct StoredThread {
    metadata: ThreadMetadata,
    items: Vec<ThreadItem>,
}

/// In-memory thread and item storage. Contents do not survive a restart.
#[derive(Default)]
pub struct ThreadStore {
    threads: RwLock<FxHashMap<String, StoredThread>>,
}

fn thread_not_found(thread_id: &str) -> HandoffError {
    HandoffError::NotFound(format!("thread '{thread_id}'"))
}

impl ThreadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a thread's metadata, keeping its items.
    pub fn save_thread(&self, metadata: ThreadMetadata) {
        let mut threads = self.threads.write();
        match threads.get_mut(&metadata.id) {
            Some(stored) => stored.metadata = metadata,
            None => {
                threads.insert(
                    metadata.id.clone(),
                    StoredThread {
                        metadata,
                        items: Vec::new(),
                    },
                );
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`HandoffError::NotFound`] for an unknown thread id.
    pub fn load_thread(&self, thread_id: &str) -> Result<ThreadMetadata, HandoffError> {
        self.threads
            .read()
            .get(thread_id)
            .map(|stored| stored.metadata.clone())
            .ok_or_else(|| thread_not_found(thread_id))
    }

    /// Append an item, or replace the stored item with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::NotFound`] for an unknown thread id.
    pub fn add_item(&self, item: ThreadItem) -> Result<(), HandoffError> {
        let mut threads = self.threads.write();
        let stored = threads
            .get_mut(item.thread_id())
            .ok_or_else(|| thread_not_found(item.thread_id()))?;
        let position = stored.items.iter().position(|existing| existing.id() == item.id());
        match position {
            Some(index) => stored.items[index] = item,
            None => stored.items.push(item),
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`HandoffError::NotFound`] when the thread or item is unknown.
    pub fn load_item(&self, thread_id: &str, item_id: &str) -> Result<ThreadItem, HandoffError> {
        let threads = self.threads.read();
        let stored = threads
            .get(thread_id)
            .ok_or_else(|| thread_not_found(thread_id))?;
        stored
            .items
            .iter()
            .find(|item| item.id() == item_id)
            .cloned()
            .ok_or_else(|| HandoffError::NotFound(format!("item '{item_id}' in thread '{thread_id}'")))
    }

    /// A page of items in insertion order, starting after `after` when given.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::NotFound`] for an unknown thread id.
    pub fn load_items(
        &self,
        thread_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<ThreadItem>, HandoffError> {
        let threads = self.threads.read();
        let stored = threads
            .get(thread_id)
            .ok_or_else(|| thread_not_found(thread_id))?;
        let start = after
            .and_then(|after| stored.items.iter().position(|item| item.id() == after))
            .map_or(0, |pos| pos + 1);
        let data: Vec<ThreadItem> = stored.items.iter().skip(start).take(limit).cloned().collect();
        let has_more = start + data.len() < stored.items.len();
        let after = if has_more {
            data.last().map(|item| item.id().to_string())
        } else {
            None
        };
        Ok(Page {
            data,
            has_more,
            after,
        })
    }

    /// Thread metadata with its first `limit` items.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::NotFound`] for an unknown thread id.
    pub fn load_full_thread(&self, thread_id: &str, limit: usize) -> Result<Thread, HandoffError> {
        let metadata = self.load_thread(thread_id)?;
        let items = self.load_items(thread_id, None, limit)?;
        Ok(Thread { metadata, items })
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.read().len()
    }
}
