//! The crawler: populates the catalog from a root directory.
//!
//! The walk is batch-oriented: metadata tuples accumulate into batches
//! of [`CRAWL_BATCH_SIZE`] bulk inserts, and the generation token is
//! checked at every batch boundary. A cancelled crawl drops its partial
//! batch on the floor - the next crawl of the root picks those entries
//! up again.

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use ignore::WalkBuilder;

use crate::cancel::Generation;
use crate::catalog::Catalog;
use crate::error::{canonicalize_existing_path, Result, SearchError};
use crate::paths::path_is_excluded;
use crate::types::Item;

/// Batch size for catalog bulk inserts; also the cancellation check
/// interval, counted over every enumerated entry whether accepted or
/// skipped.
pub const CRAWL_BATCH_SIZE: usize = 1000;

/// Counters reported by a completed crawl.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrawlStats {
    pub files: usize,
    pub dirs: usize,
    pub errors: usize,
}

/// Walks a root directory and feeds the catalog.
pub struct Crawler {
    catalog: Arc<dyn Catalog>,
    excluded_roots: Vec<PathBuf>,
    index_hidden: bool,
}

impl Crawler {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        excluded_roots: Vec<PathBuf>,
        index_hidden: bool,
    ) -> Self {
        Self {
            catalog,
            excluded_roots,
            index_hidden,
        }
    }

    /// Crawls `root` into the catalog.
    ///
    /// Existing catalog records under the root are cleared first, so a
    /// crawl is also how a root's stale entries get dropped. Entries
    /// modified after the crawl started are skipped; the filesystem
    /// watcher owns those and re-indexing them here would double-report.
    ///
    /// Returns [`SearchError::Cancelled`] if `generation` was replaced
    /// mid-walk.
    pub fn crawl(&self, root: &Path, generation: &Generation) -> Result<CrawlStats> {
        if !root.exists() {
            return Err(SearchError::InvalidInput(format!(
                "crawl root does not exist: {}",
                root.display()
            )));
        }
        let root = canonicalize_existing_path(root.to_path_buf());
        let crawl_started = SystemTime::now();

        // Trailing separator keeps sibling roots sharing a string prefix
        // (/data/foo vs /data/foobar) out of the clear.
        let mut clear_prefix = root.to_string_lossy().into_owned();
        if !clear_prefix.ends_with(std::path::MAIN_SEPARATOR) {
            clear_prefix.push(std::path::MAIN_SEPARATOR);
        }
        self.catalog.delete_prefix(&clear_prefix)?;

        let excluded_roots = self.excluded_roots.clone();
        let walker = WalkBuilder::new(&root)
            .standard_filters(false)
            .hidden(!self.index_hidden)
            .follow_links(false)
            .filter_entry(move |entry| !path_is_excluded(&excluded_roots, entry.path()))
            .build();

        let mut stats = CrawlStats::default();
        let mut batch: Vec<Item> = Vec::with_capacity(CRAWL_BATCH_SIZE);
        let mut iterations = 0usize;

        for entry in walker {
            iterations += 1;
            if iterations % CRAWL_BATCH_SIZE == 0 && generation.is_current().is_none() {
                // Partial batch is intentionally not flushed.
                return Err(SearchError::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    log::debug!("crawl skipping entry: {error}");
                    stats.errors += 1;
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(error) => {
                    log::debug!("crawl stat failed for {}: {error}", entry.path().display());
                    stats.errors += 1;
                    continue;
                }
            };

            // Entries touched after the crawl began belong to the
            // watcher; indexing them here churns against its events.
            if metadata
                .modified()
                .map(|modified| modified > crawl_started)
                .unwrap_or(false)
            {
                continue;
            }

            let item = Item::from_metadata(entry.path(), &metadata);
            if item.is_directory {
                stats.dirs += 1;
            } else {
                stats.files += 1;
            }
            batch.push(item);

            if batch.len() >= CRAWL_BATCH_SIZE {
                self.catalog.bulk_insert(mem::take(&mut batch))?;
            }
        }

        generation.is_current().ok_or(SearchError::Cancelled)?;
        if !batch.is_empty() {
            self.catalog.bulk_insert(batch)?;
        }
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::GenerationTracker;
    use crate::catalog::MemoryCatalog;
    use std::fs;

    fn write_file(path: &Path, contents: &str) {
        fs::write(path, contents).expect("write file");
    }

    #[test]
    fn crawl_indexes_files_and_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir(root.join("sub")).expect("mkdir");
        write_file(&root.join("top.txt"), "top");
        write_file(&root.join("sub/nested.txt"), "nested");

        let catalog = Arc::new(MemoryCatalog::new());
        let crawler = Crawler::new(catalog.clone(), Vec::new(), false);
        let stats = crawler
            .crawl(root, &Generation::noop())
            .expect("crawl succeeds");

        assert_eq!(stats.files, 2);
        assert_eq!(stats.dirs, 1);
        let names: Vec<String> = catalog
            .fetch_sorted_by_name(None)
            .unwrap()
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(names, ["nested.txt", "sub", "top.txt"]);
    }

    #[test]
    fn hidden_entries_are_skipped_by_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write_file(&root.join(".hidden"), "secret");
        write_file(&root.join("visible.txt"), "public");

        let catalog = Arc::new(MemoryCatalog::new());
        let crawler = Crawler::new(catalog.clone(), Vec::new(), false);
        crawler.crawl(root, &Generation::noop()).expect("crawl");

        let names: Vec<String> = catalog
            .fetch_sorted_by_name(None)
            .unwrap()
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(names, ["visible.txt"]);
    }

    #[test]
    fn hidden_entries_are_indexed_when_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write_file(&root.join(".hidden"), "secret");

        let catalog = Arc::new(MemoryCatalog::new());
        let crawler = Crawler::new(catalog.clone(), Vec::new(), true);
        crawler.crawl(root, &Generation::noop()).expect("crawl");

        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn excluded_prefixes_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir(root.join("node_modules")).expect("mkdir");
        write_file(&root.join("node_modules/dep.js"), "x");
        write_file(&root.join("main.rs"), "fn main() {}");

        let excluded = vec![canonicalize_existing_path(root.join("node_modules"))];
        let catalog = Arc::new(MemoryCatalog::new());
        let crawler = Crawler::new(catalog.clone(), excluded, false);
        crawler.crawl(root, &Generation::noop()).expect("crawl");

        let names: Vec<String> = catalog
            .fetch_sorted_by_name(None)
            .unwrap()
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(names, ["main.rs"]);
    }

    #[test]
    fn crawl_clears_stale_entries_under_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write_file(&root.join("current.txt"), "x");
        let canonical_root = canonicalize_existing_path(root.to_path_buf());

        let catalog = Arc::new(MemoryCatalog::new());
        catalog
            .upsert(Item {
                path: canonical_root.join("ghost.txt").to_string_lossy().into_owned(),
                name: "ghost.txt".to_string(),
                is_directory: false,
                size: 1,
                modified_at: None,
            })
            .unwrap();

        let crawler = Crawler::new(catalog.clone(), Vec::new(), false);
        crawler.crawl(root, &Generation::noop()).expect("crawl");

        let names: Vec<String> = catalog
            .fetch_sorted_by_name(None)
            .unwrap()
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(names, ["current.txt"]);
    }

    #[test]
    fn stale_generation_cancels_without_flushing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        // Enough entries to reach the first batch-boundary check.
        for n in 0..(CRAWL_BATCH_SIZE + 50) {
            write_file(&root.join(format!("file-{n:04}.txt")), "x");
        }

        let tracker = GenerationTracker::default();
        let stale = tracker.next_token();
        tracker.bump();

        let catalog = Arc::new(MemoryCatalog::new());
        let crawler = Crawler::new(catalog.clone(), Vec::new(), false);
        let error = crawler.crawl(root, &stale).unwrap_err();

        assert!(matches!(error, SearchError::Cancelled));
        assert!(catalog.is_empty());
    }

    #[test]
    fn missing_root_is_invalid_input() {
        let catalog = Arc::new(MemoryCatalog::new());
        let crawler = Crawler::new(catalog, Vec::new(), false);
        let error = crawler
            .crawl(Path::new("/definitely/not/here"), &Generation::noop())
            .unwrap_err();
        assert!(matches!(error, SearchError::InvalidInput(_)));
    }
}
