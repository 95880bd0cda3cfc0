//! Real-time filesystem watching.
//!
//! Raw change notifications become catalog updates and overlay
//! mutations: event paths are coalesced to a minimal ancestor cover,
//! re-stat'ed, and forwarded to the engine as `put`/`remove` calls.

mod events;

pub use events::{apply_path_change, spawn_watcher, WatcherEvent, WatcherHandle};
