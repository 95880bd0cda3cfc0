//! The delta overlay: in-memory mutations that shadow the snapshot.
//!
//! Between rebuilds, recent adds/updates live in `mutations` and recent
//! deletions in `tombstones`. Both are keyed by path. The two sets are
//! disjoint at every observable moment: inserting a mutation clears the
//! path's tombstone and vice versa.

use fnv::{FnvHashMap, FnvHashSet};

use crate::types::Item;

/// An overlay mutation with its precomputed lowercased name.
#[derive(Debug, Clone)]
pub struct OverlayEntry {
    pub item: Item,
    /// ASCII-lowercased name bytes, folded once at insert time so query
    /// matching does not re-fold per query.
    pub lower_name: Box<str>,
}

/// In-memory map of mutations since the snapshot was taken.
#[derive(Debug, Default)]
pub struct DeltaOverlay {
    mutations: FnvHashMap<String, OverlayEntry>,
    tombstones: FnvHashSet<String>,
}

impl DeltaOverlay {
    /// Records an add or update for `item.path`.
    pub fn put(&mut self, item: Item) {
        self.tombstones.remove(&item.path);
        let lower_name = item.name.to_ascii_lowercase().into_boxed_str();
        self.mutations
            .insert(item.path.clone(), OverlayEntry { item, lower_name });
    }

    /// Records a deletion for `path`.
    pub fn remove(&mut self, path: &str) {
        self.mutations.remove(path);
        self.tombstones.insert(path.to_string());
    }

    /// Drops a mutation entry without tombstoning (overlay GC).
    pub fn prune_mutation(&mut self, path: &str) {
        self.mutations.remove(path);
    }

    /// Drops a tombstone entry (overlay GC).
    pub fn prune_tombstone(&mut self, path: &str) {
        self.tombstones.remove(path);
    }

    pub fn contains_tomb(&self, path: &str) -> bool {
        self.tombstones.contains(path)
    }

    pub fn iter_mutations(&self) -> impl Iterator<Item = &OverlayEntry> {
        self.mutations.values()
    }

    pub fn mutation_paths(&self) -> impl Iterator<Item = &str> {
        self.mutations.keys().map(String::as_str)
    }

    pub fn tombstone_paths(&self) -> impl Iterator<Item = &str> {
        self.tombstones.iter().map(String::as_str)
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty() && self.tombstones.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.mutations.clear();
        self.tombstones.clear();
    }

    /// Drops all entries whose path starts with `prefix`.
    pub fn clear_prefix(&mut self, prefix: &str) {
        self.mutations.retain(|path, _| !path.starts_with(prefix));
        self.tombstones.retain(|path| !path.starts_with(prefix));
    }
}
