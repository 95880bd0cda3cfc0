//! `SearchEngine` - the top-level orchestrator.
//!
//! The engine owns the current snapshot mapping, the delta overlay, the
//! generation token, and the debounced rebuild worker. It is the single
//! logical writer: every mutation funnels through its locks, while
//! queries read the immutable mapping concurrently and fan out on the
//! rayon pool inside [`crate::BinaryIndex::search`].

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use memchr::memmem::Finder;

use super::merge;
use super::rebuild::{
    EngineState, RebuildDecision, RebuildSignal, RebuildWorkerHandle, REBUILD_DEBOUNCE_MS,
    REBUILD_MAX_DELAY_SECS,
};
use crate::cancel::GenerationTracker;
use crate::catalog::Catalog;
use crate::crawl::Crawler;
use crate::error::{lock_poisoned_error, Result, SearchError};
use crate::overlay::DeltaOverlay;
use crate::snapshot::{write_snapshot, BinaryIndex};
use crate::types::{EngineEvent, Item, SearchResults, SortSpec};

/// Number of catalog rows served as the immediate fast path when the
/// engine starts without a usable snapshot.
const STARTUP_FAST_PATH_ROWS: usize = 1000;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Location of the snapshot file.
    pub snapshot_path: PathBuf,
    /// Path prefixes excluded from crawling and watching.
    pub excluded_roots: Vec<PathBuf>,
    /// Whether dot-prefixed entries are indexed.
    pub index_hidden: bool,
    /// Quiescence window between the last mutation and a rebuild.
    pub rebuild_debounce: Duration,
    /// Cap on how long a mutation stream can postpone a rebuild.
    pub rebuild_max_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            excluded_roots: Vec::new(),
            index_hidden: false,
            rebuild_debounce: Duration::from_millis(REBUILD_DEBOUNCE_MS),
            rebuild_max_delay: Duration::from_secs(REBUILD_MAX_DELAY_SECS),
        }
    }
}

/// Snapshot location under the per-user data directory.
fn default_snapshot_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("fsearch")
        .join("index.bin")
}

/// State shared between the engine facade and its worker threads.
struct EngineShared {
    config: EngineConfig,
    catalog: Arc<dyn Catalog>,
    state: AtomicU8,
    generations: GenerationTracker,
    index: RwLock<Option<BinaryIndex>>,
    overlay: Mutex<DeltaOverlay>,
    rebuild_signal: Arc<RebuildSignal>,
    // Serializes rebuild execution; concurrent rebuild requests queue
    // here instead of racing on the snapshot file.
    rebuild_lane: Mutex<()>,
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl std::fmt::Debug for EngineShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineShared")
            .field("config", &self.config)
            .field("state", &EngineState::load(&self.state).as_str())
            .finish()
    }
}

/// The search engine.
#[derive(Debug)]
pub struct SearchEngine {
    shared: Arc<EngineShared>,
    _rebuild_worker: RebuildWorkerHandle,
}

impl SearchEngine {
    /// Creates an engine over `catalog`, loading the existing snapshot
    /// or bootstrapping one from the catalog.
    ///
    /// A corrupt snapshot is treated as absent: the engine serves an
    /// immediate fast path built from the first catalog rows and
    /// schedules a full rebuild in the background.
    pub fn new(catalog: Arc<dyn Catalog>, config: EngineConfig) -> Result<Self> {
        let rebuild_signal = Arc::new(RebuildSignal::new(
            config.rebuild_debounce,
            config.rebuild_max_delay,
        ));
        let shared = Arc::new(EngineShared {
            config,
            catalog,
            state: AtomicU8::new(EngineState::Uninitialized as u8),
            generations: GenerationTracker::default(),
            index: RwLock::new(None),
            overlay: Mutex::new(DeltaOverlay::default()),
            rebuild_signal: rebuild_signal.clone(),
            rebuild_lane: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        });

        let worker_shared = shared.clone();
        let worker = thread::spawn(move || loop {
            match worker_shared.rebuild_signal.wait_for_rebuild() {
                RebuildDecision::Shutdown => break,
                RebuildDecision::Rebuild => match run_rebuild(&worker_shared) {
                    Ok(()) => {}
                    Err(SearchError::Cancelled) => {
                        log::debug!("rebuild cancelled by a newer generation");
                    }
                    Err(error) => {
                        log::warn!("rebuild failed: {error}");
                    }
                },
            }
        });

        let engine = Self {
            shared,
            _rebuild_worker: RebuildWorkerHandle::new(rebuild_signal, worker),
        };
        engine.load_at_startup()?;
        Ok(engine)
    }

    /// Startup: open the existing snapshot, or serve a catalog fast path
    /// and schedule the full rebuild.
    fn load_at_startup(&self) -> Result<()> {
        let shared = &self.shared;
        let load_started = Instant::now();
        shared
            .state
            .store(EngineState::Loading as u8, Ordering::Relaxed);
        self.publish(EngineEvent::IndexLoadedStarted);

        match BinaryIndex::open(&shared.config.snapshot_path) {
            Ok(index) => {
                let entries = index.item_count();
                *shared
                    .index
                    .write()
                    .map_err(|_| lock_poisoned_error("engine index"))? = Some(index);
                shared
                    .state
                    .store(EngineState::Ready as u8, Ordering::Relaxed);
                self.publish(EngineEvent::IndexLoadedFinished);
                log::info!(
                    "snapshot loaded path={} entries={} elapsed_ms={}",
                    shared.config.snapshot_path.display(),
                    entries,
                    load_started.elapsed().as_millis(),
                );
                return Ok(());
            }
            Err(SearchError::SnapshotAbsent(_)) => {
                log::info!(
                    "no snapshot at {}, rebuilding from catalog",
                    shared.config.snapshot_path.display()
                );
            }
            Err(SearchError::SnapshotCorrupt(reason)) => {
                log::warn!(
                    "discarding snapshot at {}: {reason}",
                    shared.config.snapshot_path.display()
                );
                remove_file_if_present(&shared.config.snapshot_path);
            }
            Err(error) => return Err(error),
        }

        // Fast path: a bounded prefix of the catalog becomes the first
        // servable snapshot; the full catalog streams in behind it.
        let fast_items = shared
            .catalog
            .fetch_sorted_by_name(Some(STARTUP_FAST_PATH_ROWS))?;
        // A short fetch means the fast snapshot already holds the whole
        // catalog and no follow-up rebuild is owed.
        let complete = fast_items.len() < STARTUP_FAST_PATH_ROWS;
        write_snapshot(fast_items, &shared.config.snapshot_path)?;
        let index = BinaryIndex::open(&shared.config.snapshot_path)?;
        let entries = index.item_count();
        *shared
            .index
            .write()
            .map_err(|_| lock_poisoned_error("engine index"))? = Some(index);
        shared
            .state
            .store(EngineState::Ready as u8, Ordering::Relaxed);
        self.publish(EngineEvent::IndexLoadedFinished);
        if !complete {
            shared.rebuild_signal.force();
        }
        log::info!(
            "fast-path snapshot ready entries={} elapsed_ms={}",
            entries,
            load_started.elapsed().as_millis(),
        );
        Ok(())
    }

    /// Runs a query and returns the encoded result window.
    ///
    /// `limit == 0` means unlimited. `total` is the merged result count
    /// before truncation; for the empty query that is snapshot count
    /// plus overlay adds minus tombstoned snapshot rows.
    pub fn search(&self, query: &str, sort: SortSpec, limit: usize) -> Result<SearchResults> {
        let shared = &self.shared;
        let guard = shared
            .index
            .read()
            .map_err(|_| lock_poisoned_error("engine index"))?;
        let index = guard.as_ref();

        let tokens = merge::query_tokens(query);
        let needles: Vec<Finder<'_>> = tokens.iter().map(|token| Finder::new(token)).collect();

        // Take what the query needs out of the overlay in one short
        // critical section: matching items plus every shadowed path.
        let (mut overlay_items, shadowed_paths) = {
            let overlay = shared
                .overlay
                .lock()
                .map_err(|_| lock_poisoned_error("engine overlay"))?;
            let matching: Vec<Item> = overlay
                .iter_mutations()
                .filter(|entry| merge::overlay_matches(entry, &needles))
                .map(|entry| entry.item.clone())
                .collect();
            let shadowed: Vec<String> = if index.is_some() {
                overlay
                    .tombstone_paths()
                    .chain(overlay.mutation_paths())
                    .map(str::to_string)
                    .collect()
            } else {
                Vec::new()
            };
            (matching, shadowed)
        };

        let mut snapshot_indices = match index {
            Some(index) => index.search(query),
            None => Vec::new(),
        };

        // Tombstoned paths and overlay-rewritten paths both shadow their
        // snapshot records.
        if let Some(index) = index {
            if !shadowed_paths.is_empty() {
                let shadow_set: HashSet<u32> = shadowed_paths
                    .iter()
                    .filter_map(|path| index.find_path(path))
                    .collect();
                if !shadow_set.is_empty() {
                    snapshot_indices.retain(|candidate| !shadow_set.contains(candidate));
                }
            }
            index.sort(&mut snapshot_indices, sort.key, sort.ascending);
        }

        merge::sort_overlay_items(&mut overlay_items, sort.key, sort.ascending);
        let mut entries = merge::merge_results(
            index,
            &snapshot_indices,
            &overlay_items,
            sort.key,
            sort.ascending,
        );

        let total = entries.len();
        if limit > 0 {
            entries.truncate(limit);
        }
        Ok(SearchResults {
            entries,
            total,
            overlay_items,
        })
    }

    /// Decodes one entry of a result window.
    ///
    /// Stale or out-of-range entries (for example, an index vector kept
    /// across a rebuild) decode to the sentinel item instead of failing.
    pub fn materialize(&self, results: &SearchResults, entry: i64) -> Item {
        if entry < 0 {
            return results
                .overlay_items
                .get(!entry as usize)
                .cloned()
                .unwrap_or_else(Item::sentinel);
        }
        self.shared
            .index
            .read()
            .ok()
            .and_then(|guard| {
                guard
                    .as_ref()
                    .and_then(|index| index.materialize(entry as u32))
            })
            .unwrap_or_else(Item::sentinel)
    }

    /// Records an add or update: catalog write-through, overlay shadow,
    /// debounced rebuild.
    pub fn put(&self, item: Item) -> Result<()> {
        self.shared.catalog.upsert(item.clone())?;
        self.shared
            .overlay
            .lock()
            .map_err(|_| lock_poisoned_error("engine overlay"))?
            .put(item);
        self.shared.rebuild_signal.mark_dirty();
        self.publish(EngineEvent::IndexUpdated);
        Ok(())
    }

    /// Records a deletion.
    pub fn remove(&self, path: &str) -> Result<()> {
        self.shared.catalog.delete(path)?;
        self.shared
            .overlay
            .lock()
            .map_err(|_| lock_poisoned_error("engine overlay"))?
            .remove(path);
        self.shared.rebuild_signal.mark_dirty();
        self.publish(EngineEvent::IndexUpdated);
        Ok(())
    }

    /// Removes a whole subtree.
    ///
    /// Prefix iteration over the snapshot is not supported by the record
    /// layout, so this forces an immediate full rebuild instead.
    pub fn remove_prefix(&self, prefix: &str) -> Result<()> {
        self.shared.catalog.delete_prefix(prefix)?;
        self.shared
            .overlay
            .lock()
            .map_err(|_| lock_poisoned_error("engine overlay"))?
            .clear_prefix(prefix);
        self.shared.rebuild_signal.force();
        self.publish(EngineEvent::IndexUpdated);
        Ok(())
    }

    /// Cancels in-flight work, drops the snapshot, and removes it from
    /// disk. The engine returns to `Uninitialized`.
    pub fn clear(&self) -> Result<()> {
        self.shared.generations.bump();
        *self
            .shared
            .index
            .write()
            .map_err(|_| lock_poisoned_error("engine index"))? = None;
        self.shared
            .overlay
            .lock()
            .map_err(|_| lock_poisoned_error("engine overlay"))?
            .clear();
        remove_file_if_present(&self.shared.config.snapshot_path);
        self.shared
            .state
            .store(EngineState::Uninitialized as u8, Ordering::Relaxed);
        self.publish(EngineEvent::IndexUpdated);
        Ok(())
    }

    /// Schedules a rebuild on the worker, skipping the debounce window.
    pub fn force_rebuild(&self) {
        self.shared.rebuild_signal.force();
    }

    /// Runs a rebuild on the calling thread and waits for it.
    pub fn rebuild_now(&self) -> Result<()> {
        run_rebuild(&self.shared)
    }

    /// Invalidates the generation token held by in-flight crawls and
    /// rebuilds; they stop at their next batch boundary.
    pub fn cancel_indexing(&self) {
        self.shared.generations.bump();
    }

    /// Crawls `root` into the catalog on a background thread, then
    /// requests a rebuild.
    pub fn index_root(&self, root: PathBuf) -> thread::JoinHandle<()> {
        let shared = self.shared.clone();
        thread::spawn(move || {
            let token = shared.generations.next_token();
            let crawler = Crawler::new(
                shared.catalog.clone(),
                shared.config.excluded_roots.clone(),
                shared.config.index_hidden,
            );
            match crawler.crawl(&root, &token) {
                Ok(stats) => {
                    log::info!(
                        "crawl finished root={} files={} dirs={} errors={}",
                        root.display(),
                        stats.files,
                        stats.dirs,
                        stats.errors,
                    );
                    shared.rebuild_signal.force();
                }
                Err(SearchError::Cancelled) => {
                    log::debug!("crawl cancelled root={}", root.display());
                }
                Err(error) => {
                    log::warn!("crawl failed root={}: {error}", root.display());
                }
            }
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        EngineState::load(&self.shared.state)
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (sender, receiver) = unbounded();
        if let Ok(mut subscribers) = self.shared.subscribers.lock() {
            subscribers.push(sender);
        }
        receiver
    }

    fn publish(&self, event: EngineEvent) {
        publish_event(&self.shared, event);
    }
}

fn publish_event(shared: &EngineShared, event: EngineEvent) {
    if let Ok(mut subscribers) = shared.subscribers.lock() {
        subscribers.retain(|sender| sender.send(event).is_ok());
    }
}

fn remove_file_if_present(path: &std::path::Path) {
    if let Err(error) = fs::remove_file(path) {
        if error.kind() != ErrorKind::NotFound {
            log::warn!("failed to remove {}: {error}", path.display());
        }
    }
}

/// Drains the catalog into a fresh snapshot and swaps it in.
///
/// The overlay is intentionally not cleared afterwards: mutations that
/// arrived while the catalog was being read may not be in the new
/// snapshot, and leaving them preserves read-your-writes. The GC pass
/// prunes only entries the new snapshot already agrees with.
fn run_rebuild(shared: &Arc<EngineShared>) -> Result<()> {
    let _lane = shared
        .rebuild_lane
        .lock()
        .map_err(|_| lock_poisoned_error("engine rebuild lane"))?;

    let rebuild_started = Instant::now();
    let had_index = shared
        .index
        .read()
        .map_err(|_| lock_poisoned_error("engine index"))?
        .is_some();
    shared.state.store(
        if had_index {
            EngineState::Rebuilding as u8
        } else {
            EngineState::Loading as u8
        },
        Ordering::Relaxed,
    );

    let token = shared.generations.next_token();
    let result = (|| -> Result<usize> {
        let items = shared.catalog.fetch_sorted_by_name(None)?;
        token.is_current().ok_or(SearchError::Cancelled)?;

        let count = items.len();
        if let Err(error) = write_snapshot(items, &shared.config.snapshot_path) {
            // Queries continue against the previous snapshot; the next
            // debounce tick retries the write.
            shared.rebuild_signal.mark_dirty();
            return Err(error);
        }
        token.is_current().ok_or(SearchError::Cancelled)?;

        let index = BinaryIndex::open(&shared.config.snapshot_path)?;
        {
            let mut guard = shared
                .index
                .write()
                .map_err(|_| lock_poisoned_error("engine index"))?;
            *guard = Some(index);
        }
        Ok(count)
    })();

    match result {
        Ok(count) => {
            gc_overlay(shared);
            shared
                .state
                .store(EngineState::Ready as u8, Ordering::Relaxed);
            publish_event(shared, EngineEvent::IndexUpdated);
            log::info!(
                "rebuild finished entries={count} elapsed_ms={}",
                rebuild_started.elapsed().as_millis(),
            );
            Ok(())
        }
        Err(error) => {
            shared.state.store(
                if had_index {
                    EngineState::Ready as u8
                } else {
                    EngineState::Uninitialized as u8
                },
                Ordering::Relaxed,
            );
            Err(error)
        }
    }
}

/// Prunes overlay entries the new snapshot already reflects: mutations
/// whose stored record matches on size/mtime/kind, and tombstones whose
/// path is gone from the snapshot.
fn gc_overlay(shared: &Arc<EngineShared>) {
    let Ok(index_guard) = shared.index.read() else {
        return;
    };
    let Some(index) = index_guard.as_ref() else {
        return;
    };
    let Ok(mut overlay) = shared.overlay.lock() else {
        return;
    };

    let absorbed: Vec<String> = overlay
        .iter_mutations()
        .filter(|entry| {
            index
                .find_path(&entry.item.path)
                .and_then(|found| index.materialize(found))
                .is_some_and(|stored| stored == entry.item)
        })
        .map(|entry| entry.item.path.clone())
        .collect();
    for path in &absorbed {
        overlay.prune_mutation(path);
    }

    let settled: Vec<String> = overlay
        .tombstone_paths()
        .filter(|path| index.find_path(path).is_none())
        .map(str::to_string)
        .collect();
    for path in &settled {
        overlay.prune_tombstone(path);
    }

    if !absorbed.is_empty() || !settled.is_empty() {
        log::debug!(
            "overlay gc pruned mutations={} tombstones={}",
            absorbed.len(),
            settled.len()
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
