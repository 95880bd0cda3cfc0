//! `BinaryIndex` - the memory-mapped snapshot reader.
//!
//! The mapping is immutable for the lifetime of the reader, so the
//! parallel scan workers and concurrent query threads share it freely.
//! Dropping the reader unmaps the file.

use std::cmp::Ordering;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::thread::available_parallelism;

use memchr::memmem::Finder;
use memmap2::Mmap;
use rayon::prelude::*;

use super::format::{RecordView, FORMAT_VERSION, HEADER_BYTES, MAGIC, RECORD_STRIDE};
use super::scan;
use crate::error::{Result, SearchError};
use crate::types::{Item, SortKey};

/// Read-only view over one snapshot file.
#[derive(Debug)]
pub struct BinaryIndex {
    map: Mmap,
    count: usize,
}

impl BinaryIndex {
    /// Opens and validates a snapshot file.
    ///
    /// A missing file maps to [`SearchError::SnapshotAbsent`]; a failed
    /// magic, version, or size check maps to
    /// [`SearchError::SnapshotCorrupt`].
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                SearchError::SnapshotAbsent(path.to_path_buf())
            } else {
                SearchError::Io(error)
            }
        })?;
        // Safety: the snapshot is written once and renamed into place;
        // nothing truncates or rewrites it while mapped.
        let map = unsafe { Mmap::map(&file)? };

        if map.len() < HEADER_BYTES {
            return Err(SearchError::SnapshotCorrupt(format!(
                "file too small for header: {} bytes",
                map.len()
            )));
        }
        if map[0..4] != MAGIC {
            return Err(SearchError::SnapshotCorrupt(format!(
                "bad magic {:02x?}",
                &map[0..4]
            )));
        }
        let version = i32::from_le_bytes(map[4..8].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(SearchError::SnapshotCorrupt(format!(
                "unsupported version {version}"
            )));
        }
        let count = i64::from_le_bytes(map[8..16].try_into().unwrap());
        if count < 0 {
            return Err(SearchError::SnapshotCorrupt(format!(
                "negative record count {count}"
            )));
        }
        let count = count as usize;
        let needed = HEADER_BYTES as u64 + count as u64 * RECORD_STRIDE as u64;
        if (map.len() as u64) < needed {
            return Err(SearchError::SnapshotCorrupt(format!(
                "record count {count} exceeds file size {}",
                map.len()
            )));
        }

        Ok(Self { map, count })
    }

    /// Number of records in the snapshot.
    #[inline]
    pub fn item_count(&self) -> usize {
        self.count
    }

    /// Runs the substring search and returns matching record indices.
    ///
    /// The query is ASCII-lowercased and split on whitespace; a record
    /// matches when its lowercased name contains every token. The scan
    /// fans out over contiguous partitions, one per available hardware
    /// thread, each worker filling its own output buffer; concatenation
    /// preserves partition order, so the returned indices are globally
    /// ascending - the natural name-sorted order of the snapshot.
    ///
    /// An empty query returns `[0, count)`.
    pub fn search(&self, query: &str) -> Vec<u32> {
        let tokens: Vec<Vec<u8>> = query
            .split_whitespace()
            .map(|token| token.to_ascii_lowercase().into_bytes())
            .collect();
        if tokens.is_empty() {
            return (0..self.count as u32).collect();
        }
        let needles: Vec<Finder<'_>> = tokens.iter().map(|token| Finder::new(token)).collect();

        let workers = available_parallelism().map(|n| n.get()).unwrap_or(1);
        let count = self.count as u32;
        let chunk = (self.count.div_ceil(workers.max(1))).max(1) as u32;

        let ranges: Vec<(u32, u32)> = (0..workers as u32)
            .map(|worker| {
                let start = worker * chunk;
                (start.min(count), (start + chunk).min(count))
            })
            .filter(|(start, end)| start < end)
            .collect();

        let buffer: &[u8] = &self.map;
        let partials: Vec<Vec<u32>> = ranges
            .into_par_iter()
            .map(|(start, end)| scan::scan(buffer, HEADER_BYTES, RECORD_STRIDE, start, end, &needles))
            .collect();

        let mut matches = Vec::with_capacity(partials.iter().map(Vec::len).sum());
        for partial in partials {
            matches.extend(partial);
        }
        matches
    }

    /// Decodes the record at `index` into a heap item.
    ///
    /// Returns `None` for an out-of-range index (a stale entry from a
    /// replaced snapshot); invalid UTF-8 decodes with replacement
    /// characters; a stored mtime of 0.0 decodes as absent.
    pub fn materialize(&self, index: u32) -> Option<Item> {
        if index as usize >= self.count {
            return None;
        }
        let view = self.record(index);
        let mtime = view.mtime();
        Some(Item {
            path: String::from_utf8_lossy(view.path_bytes()).into_owned(),
            name: String::from_utf8_lossy(view.name_bytes()).into_owned(),
            is_directory: view.is_directory(),
            size: view.size(),
            modified_at: if mtime == 0.0 { None } else { Some(mtime) },
        })
    }

    /// Finds the record index for an exact path, if present.
    pub fn find_path(&self, path: &str) -> Option<u32> {
        scan::lookup_path(
            &self.map,
            HEADER_BYTES,
            RECORD_STRIDE,
            self.count as u32,
            path.as_bytes(),
        )
    }

    /// Sorts a vector of record indices in place by `key`.
    pub fn sort(&self, indices: &mut [u32], key: SortKey, ascending: bool) {
        scan::sort_indices(indices, &self.map, HEADER_BYTES, RECORD_STRIDE, key, ascending);
    }

    /// Compares the record at `index` against an in-memory item on `key`.
    ///
    /// Used by the merge so the snapshot and overlay orderings agree on
    /// the same byte-lexicographic basis.
    pub fn compare(&self, index: u32, item: &Item, key: SortKey) -> Ordering {
        scan::compare_record(&self.map, HEADER_BYTES, RECORD_STRIDE, index, item, key)
    }

    #[inline]
    fn record(&self, index: u32) -> RecordView<'_> {
        RecordView::new(&self.map, HEADER_BYTES, RECORD_STRIDE, index)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::writer::write_snapshot;

    fn item(name: &str, path: &str, size: i64, mtime: Option<f64>, dir: bool) -> Item {
        Item {
            path: path.to_string(),
            name: name.to_string(),
            is_directory: dir,
            size,
            modified_at: mtime,
        }
    }

    fn sample_items() -> Vec<Item> {
        vec![
            item("Alpha.txt", "/a/Alpha.txt", 10, Some(100.0), false),
            item("Beta.log", "/a/Beta.log", 2, Some(300.0), false),
            item("Gamma.md", "/b/Gamma.md", 50, None, true),
        ]
    }

    fn open_sample(dir: &Path) -> BinaryIndex {
        let dest = dir.join("index.bin");
        write_snapshot(sample_items(), &dest).expect("write should succeed");
        BinaryIndex::open(&dest).expect("open should succeed")
    }

    #[test]
    fn roundtrip_materializes_items_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = open_sample(dir.path());

        assert_eq!(index.item_count(), 3);
        let mut sorted = sample_items();
        sorted.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        for (position, expected) in sorted.iter().enumerate() {
            let decoded = index.materialize(position as u32).expect("in range");
            assert_eq!(&decoded, expected);
        }
    }

    #[test]
    fn adjacent_records_are_name_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = open_sample(dir.path());

        for position in 0..index.item_count().saturating_sub(1) {
            let left = index.materialize(position as u32).unwrap();
            let right = index.materialize(position as u32 + 1).unwrap();
            assert!(left.name.as_bytes() <= right.name.as_bytes());
        }
    }

    #[test]
    fn open_missing_file_is_snapshot_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = BinaryIndex::open(&dir.path().join("missing.bin")).unwrap_err();
        assert!(matches!(error, SearchError::SnapshotAbsent(_)));
    }

    #[test]
    fn open_rejects_bad_magic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");
        std::fs::write(&path, b"NOPE0000000000000000").expect("write");
        let error = BinaryIndex::open(&path).unwrap_err();
        assert!(matches!(error, SearchError::SnapshotCorrupt(_)));
    }

    #[test]
    fn open_rejects_bad_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"ERRT");
        bytes.extend_from_slice(&9i32.to_le_bytes());
        bytes.extend_from_slice(&0i64.to_le_bytes());
        std::fs::write(&path, &bytes).expect("write");
        let error = BinaryIndex::open(&path).unwrap_err();
        assert!(matches!(error, SearchError::SnapshotCorrupt(_)));
    }

    #[test]
    fn open_rejects_count_exceeding_file_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"ERRT");
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&1000i64.to_le_bytes());
        std::fs::write(&path, &bytes).expect("write");
        let error = BinaryIndex::open(&path).unwrap_err();
        assert!(matches!(error, SearchError::SnapshotCorrupt(_)));
    }

    #[test]
    fn empty_snapshot_is_valid_and_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("index.bin");
        write_snapshot(Vec::new(), &dest).expect("write");
        let index = BinaryIndex::open(&dest).expect("open");
        assert_eq!(index.item_count(), 0);
        assert!(index.search("anything").is_empty());
        assert!(index.search("").is_empty());
    }

    #[test]
    fn substring_search_is_case_insensitive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = open_sample(dir.path());

        // Every sample name contains "a" after lowercasing.
        assert_eq!(index.search("a").len(), 3);
        assert_eq!(index.search("ALPHA").len(), 1);
        assert_eq!(index.search("gamma.md").len(), 1);
    }

    #[test]
    fn query_longer_than_every_name_matches_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = open_sample(dir.path());
        assert!(index.search("a-query-longer-than-every-stored-name").is_empty());
    }

    #[test]
    fn multi_token_query_requires_all_tokens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("index.bin");
        write_snapshot(
            vec![
                item("foobar.txt", "/x/foobar.txt", 1, None, false),
                item("foo.txt", "/x/foo.txt", 1, None, false),
            ],
            &dest,
        )
        .expect("write");
        let index = BinaryIndex::open(&dest).expect("open");

        let matches = index.search("foo bar");
        assert_eq!(matches.len(), 1);
        assert_eq!(
            index.materialize(matches[0]).unwrap().name,
            "foobar.txt"
        );
    }

    #[test]
    fn empty_query_returns_every_index_ascending() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = open_sample(dir.path());
        let all = index.search("");
        assert_eq!(all, vec![0, 1, 2]);
    }

    #[test]
    fn parallel_scan_equals_single_range_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("index.bin");
        let items: Vec<Item> = (0..5000)
            .map(|n| {
                item(
                    &format!("file-{n:04}.dat"),
                    &format!("/bulk/file-{n:04}.dat"),
                    n,
                    Some(n as f64),
                    false,
                )
            })
            .collect();
        write_snapshot(items, &dest).expect("write");
        let index = BinaryIndex::open(&dest).expect("open");

        for query in ["7", "file-00", "dat", "file-4999"] {
            let parallel = index.search(query);
            let needle_bytes = query.to_ascii_lowercase().into_bytes();
            let needles = vec![memchr::memmem::Finder::new(&needle_bytes)];
            let file = std::fs::read(&dest).expect("read");
            let linear = scan::scan(
                &file,
                HEADER_BYTES,
                RECORD_STRIDE,
                0,
                index.item_count() as u32,
                &needles,
            );
            assert_eq!(parallel, linear, "query {query:?}");
        }
    }

    #[test]
    fn find_path_requires_exact_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = open_sample(dir.path());

        let found = index.find_path("/a/Beta.log").expect("present");
        assert_eq!(index.materialize(found).unwrap().name, "Beta.log");
        assert!(index.find_path("/a/Beta").is_none());
        assert!(index.find_path("/a/Beta.log.bak").is_none());
    }

    #[test]
    fn sort_by_each_key_each_direction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = open_sample(dir.path());

        let names = |indices: &[u32]| -> Vec<String> {
            indices
                .iter()
                .map(|i| index.materialize(*i).unwrap().name)
                .collect()
        };

        let mut indices = index.search("");
        index.sort(&mut indices, SortKey::Size, false);
        assert_eq!(names(&indices), ["Gamma.md", "Alpha.txt", "Beta.log"]);

        index.sort(&mut indices, SortKey::Size, true);
        assert_eq!(names(&indices), ["Beta.log", "Alpha.txt", "Gamma.md"]);

        // Absent mtime (Gamma) sorts earliest.
        index.sort(&mut indices, SortKey::Date, true);
        assert_eq!(names(&indices), ["Gamma.md", "Alpha.txt", "Beta.log"]);

        index.sort(&mut indices, SortKey::Date, false);
        assert_eq!(names(&indices), ["Beta.log", "Alpha.txt", "Gamma.md"]);

        index.sort(&mut indices, SortKey::Path, true);
        assert_eq!(names(&indices), ["Alpha.txt", "Beta.log", "Gamma.md"]);

        index.sort(&mut indices, SortKey::Name, false);
        assert_eq!(names(&indices), ["Gamma.md", "Beta.log", "Alpha.txt"]);
    }

    #[test]
    fn materialize_out_of_range_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = open_sample(dir.path());
        assert!(index.materialize(999).is_none());
    }

    #[test]
    fn compare_agrees_with_materialized_ordering() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = open_sample(dir.path());

        let probe = item("Beta.log", "/a/Beta.log", 2, Some(300.0), false);
        for position in 0..index.item_count() as u32 {
            let stored = index.materialize(position).unwrap();
            let expected = stored.name.as_bytes().cmp(probe.name.as_bytes());
            assert_eq!(index.compare(position, &probe, SortKey::Name), expected);
        }
        let found = index.find_path("/a/Beta.log").unwrap();
        assert_eq!(
            index.compare(found, &probe, SortKey::Size),
            std::cmp::Ordering::Equal
        );
    }
}
