//! The catalog interface the engine consumes.
//!
//! The authoritative metadata store is an external collaborator; the
//! engine only needs the operations below and is agnostic to storage
//! technology. [`MemoryCatalog`] is the reference implementation backing
//! the test suite and small deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{lock_poisoned_error, Result};
use crate::types::Item;

/// Operations the engine requires of the metadata store.
///
/// Implementations must support background-context writes concurrent
/// with read queries.
pub trait Catalog: Send + Sync {
    /// Inserts a batch of items, replacing existing records by path.
    fn bulk_insert(&self, items: Vec<Item>) -> Result<()>;

    /// Fetches records sorted by name (path as tiebreaker), projecting
    /// the five metadata fields. `limit` caps the result when given.
    fn fetch_sorted_by_name(&self, limit: Option<usize>) -> Result<Vec<Item>>;

    /// Inserts or replaces the record for `item.path`.
    fn upsert(&self, item: Item) -> Result<()>;

    /// Deletes the record for `path`, if present.
    fn delete(&self, path: &str) -> Result<()>;

    /// Deletes every record whose path starts with `prefix`.
    fn delete_prefix(&self, prefix: &str) -> Result<()>;
}

/// In-memory catalog keyed by path.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: Mutex<HashMap<String, Item>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Catalog for MemoryCatalog {
    fn bulk_insert(&self, items: Vec<Item>) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| lock_poisoned_error("catalog entries"))?;
        for item in items {
            entries.insert(item.path.clone(), item);
        }
        Ok(())
    }

    fn fetch_sorted_by_name(&self, limit: Option<usize>) -> Result<Vec<Item>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| lock_poisoned_error("catalog entries"))?;
        let mut items: Vec<Item> = entries.values().cloned().collect();
        items.sort_unstable_by(|a, b| {
            a.name
                .as_bytes()
                .cmp(b.name.as_bytes())
                .then_with(|| a.path.as_bytes().cmp(b.path.as_bytes()))
        });
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    fn upsert(&self, item: Item) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| lock_poisoned_error("catalog entries"))?
            .insert(item.path.clone(), item);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| lock_poisoned_error("catalog entries"))?
            .remove(path);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| lock_poisoned_error("catalog entries"))?
            .retain(|path, _| !path.starts_with(prefix));
        Ok(())
    }
}
