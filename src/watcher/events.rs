//! The notify adapter: filesystem events in, engine mutations out.
//!
//! Watcher callbacks send events through a crossbeam channel instead of
//! touching shared state; a single consumer thread applies them to the
//! engine. Kernel-side overflow (or any event without paths) escalates
//! to a full re-crawl of the root, since arbitrary changes may have been
//! dropped.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::engine::SearchEngine;
use crate::error::{canonicalize_existing_path, Result, SearchError};
use crate::paths::{coalesce_event_paths, path_in_scope, path_is_excluded};
use crate::types::Item;

/// An event sent from the watcher callback to the consumer thread.
#[derive(Debug)]
pub enum WatcherEvent {
    /// Incremental path changes to re-stat and apply.
    PathsChanged(Vec<PathBuf>),
    /// Events were dropped or the root changed wholesale; the root must
    /// be re-crawled.
    RescanRequired,
    /// The watcher encountered an error.
    Error(String),
}

/// Keeps the OS watcher and its consumer thread alive.
///
/// Dropping the handle stops watching: the OS watcher goes first, which
/// closes the channel and lets the consumer thread drain and exit.
pub struct WatcherHandle {
    watcher: Option<RecommendedWatcher>,
    consumer: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("watcher", &self.watcher.is_some())
            .finish()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        drop(self.watcher.take());
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
    }
}

/// Starts watching `root` recursively, feeding changes into `engine`.
pub fn spawn_watcher(engine: Arc<SearchEngine>, root: PathBuf) -> Result<WatcherHandle> {
    let root = canonicalize_existing_path(root);
    let (event_tx, event_rx) = unbounded::<WatcherEvent>();

    let callback_tx = event_tx.clone();
    let mut watcher = recommended_watcher(move |event_result: notify::Result<Event>| {
        forward_event(&callback_tx, event_result);
    })
    .map_err(|error| {
        SearchError::Internal(format!(
            "failed to create filesystem watcher for {}: {error}",
            root.display()
        ))
    })?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|error| {
            SearchError::Internal(format!("failed to watch {}: {error}", root.display()))
        })?;
    drop(event_tx);

    let consumer_root = root.clone();
    let consumer = thread::spawn(move || {
        while let Ok(event) = event_rx.recv() {
            match event {
                WatcherEvent::PathsChanged(paths) => {
                    for changed in coalesce_event_paths(paths) {
                        apply_path_change(&engine, &consumer_root, &changed);
                    }
                }
                WatcherEvent::RescanRequired => {
                    log::info!(
                        "watcher requested rescan of {}",
                        consumer_root.display()
                    );
                    let _ = engine.index_root(consumer_root.clone());
                }
                WatcherEvent::Error(message) => {
                    log::warn!("watcher error on {}: {message}", consumer_root.display());
                }
            }
        }
    });

    log::info!("watching {}", root.display());
    Ok(WatcherHandle {
        watcher: Some(watcher),
        consumer: Some(consumer),
    })
}

/// Translates one notify callback into a channel event.
fn forward_event(event_tx: &Sender<WatcherEvent>, event_result: notify::Result<Event>) {
    match event_result {
        Ok(event) => {
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            if event.need_rescan() || event.paths.is_empty() {
                let _ = event_tx.send(WatcherEvent::RescanRequired);
            } else {
                let _ = event_tx.send(WatcherEvent::PathsChanged(event.paths));
            }
        }
        Err(error) => {
            let _ = event_tx.send(WatcherEvent::Error(error.to_string()));
        }
    }
}

/// Re-stats one changed path and forwards the result to the engine.
///
/// An existing path becomes a `put`, a missing one a `remove`. Paths
/// outside the watched root or under an excluded prefix are ignored.
pub fn apply_path_change(engine: &SearchEngine, root: &Path, changed: &Path) {
    let changed = canonicalize_existing_path(changed.to_path_buf());
    if !path_in_scope(root, &changed) {
        return;
    }
    if path_is_excluded(&engine.config().excluded_roots, &changed) {
        return;
    }

    let outcome = match fs::symlink_metadata(&changed) {
        Ok(metadata) => engine.put(Item::from_metadata(&changed, &metadata)),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            engine.remove(changed.to_string_lossy().as_ref())
        }
        Err(error) => {
            log::debug!("stat failed for {}: {error}", changed.display());
            return;
        }
    };
    if let Err(error) = outcome {
        log::warn!(
            "failed to apply change for {}: {error}",
            changed.display()
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
