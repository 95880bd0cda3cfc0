//! The search engine: orchestration of snapshot, overlay, and rebuilds.
//!
//! ## Module structure
//!
//! - `rebuild` - engine state machine, debounced rebuild signal and worker
//! - `merge` - overlay matching and the snapshot/overlay result merge
//! - `manager` - the `SearchEngine` itself

mod manager;
mod merge;
mod rebuild;

pub use manager::{EngineConfig, SearchEngine};
pub use rebuild::{EngineState, RebuildSignal, REBUILD_DEBOUNCE_MS, REBUILD_MAX_DELAY_SECS};
