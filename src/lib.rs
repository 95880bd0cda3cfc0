//! Interactive file-search engine.
//!
//! This crate answers substring queries over hundreds of thousands to
//! millions of filesystem entries fast enough to run on every keystroke:
//! - An immutable, memory-mapped binary snapshot of packed records,
//!   scanned in parallel with byte-level primitives
//! - A live delta overlay of recent mutations that shadows the snapshot
//!   between rebuilds
//! - A crawler that populates the external catalog and a watcher that
//!   keeps it current
//! - A debounced rebuild pipeline that drains the catalog into a fresh
//!   snapshot and atomically swaps it in
//!
//! Matching is case-insensitive with ASCII-only folding; full Unicode
//! case folding is out of scope.

pub mod cancel;
pub mod catalog;
pub mod crawl;
pub mod engine;
pub mod error;
pub mod overlay;
pub mod paths;
pub mod snapshot;
pub mod types;
pub mod watcher;

// Re-export main types
pub use cancel::{Generation, GenerationTracker};
pub use catalog::{Catalog, MemoryCatalog};
pub use crawl::{Crawler, CrawlStats};
pub use engine::{EngineConfig, EngineState, SearchEngine};
pub use error::{canonicalize_existing_path, Result, SearchError};
pub use overlay::DeltaOverlay;
pub use snapshot::{write_snapshot, BinaryIndex};
pub use types::{EngineEvent, Item, SearchResults, SortKey, SortSpec};
pub use watcher::{spawn_watcher, WatcherHandle};
