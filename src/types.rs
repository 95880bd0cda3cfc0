//! Core item and result types for the search engine.
//!
//! These are the types crossing the engine boundary. Consumers (a UI
//! table or IPC client) receive [`SearchResults`] and materialize rows on
//! demand, so the item payload carries serde derives.

use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// A filesystem entry as stored in the catalog, the overlay, and the
/// snapshot. `path` is the identity; `name` is the final path component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub path: String,
    pub name: String,
    pub is_directory: bool,
    pub size: i64,
    /// Seconds since the Unix epoch. `None` sorts as "earliest" and is
    /// encoded as 0.0 in the snapshot.
    pub modified_at: Option<f64>,
}

impl Item {
    /// Builds an item from a path and its stat metadata.
    ///
    /// This is the single construction point used by the crawler and the
    /// watcher adapter so both produce identical records for a path.
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|instant| instant.duration_since(UNIX_EPOCH).ok())
            .map(|since_epoch| since_epoch.as_secs_f64());
        Self {
            path: path.to_string_lossy().into_owned(),
            name,
            is_directory: metadata.is_dir(),
            size: metadata.len() as i64,
            modified_at,
        }
    }

    /// The sentinel returned when a stale or out-of-range entry is
    /// materialized. Queries never fail; they degrade to this.
    pub fn sentinel() -> Self {
        Self {
            path: String::new(),
            name: String::new(),
            is_directory: false,
            size: 0,
            modified_at: None,
        }
    }

    /// Modification time on the comparison axis: absent maps to 0.0,
    /// matching the snapshot encoding so both sides order identically.
    #[inline]
    pub fn mtime_secs(&self) -> f64 {
        self.modified_at.unwrap_or(0.0)
    }
}

/// Sort key for result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Name,
    Path,
    Size,
    Date,
}

/// Requested result ordering: key plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub ascending: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: SortKey::Name,
            ascending: true,
        }
    }
}

impl SortSpec {
    pub fn new(key: SortKey, ascending: bool) -> Self {
        Self { key, ascending }
    }
}

/// Change notifications published by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEvent {
    IndexLoadedStarted,
    IndexLoadedFinished,
    IndexUpdated,
}

/// The result of one query: a virtual vector of signed entries plus the
/// per-query overlay items the negative entries reference.
///
/// Non-negative entries are snapshot record indices; negative entries are
/// the bitwise NOT of a position in `overlay_items`. Materialization is
/// on demand via [`crate::SearchEngine::materialize`], so serving a
/// million-row window never copies a million heap items.
#[derive(Debug, Default)]
pub struct SearchResults {
    /// Encoded entries, ordered by the requested sort, truncated to the
    /// requested limit.
    pub entries: Vec<i64>,
    /// Number of merged results before truncation.
    pub total: usize,
    /// Overlay items referenced by negative entries.
    pub overlay_items: Vec<Item>,
}
