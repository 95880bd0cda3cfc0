//! Stateless byte-level primitives over the packed record buffer.
//!
//! Everything here operates on a raw buffer plus offsets and holds no
//! state, so the parallel search workers can share one immutable mapping
//! with no locks in the hot loop.

use std::cmp::Ordering;

use memchr::memmem::Finder;

use super::format::RecordView;
use crate::types::{Item, SortKey};

/// Scans records `[start, end)` for names containing every needle.
///
/// Needles must already be lowercased by the caller; matching runs over
/// the precomputed lowercased-name bytes of each record. Indices are
/// returned in scan order. The only allocation is the output buffer,
/// pre-sized to the partition length.
pub fn scan(
    buffer: &[u8],
    item_base: usize,
    stride: usize,
    start: u32,
    end: u32,
    needles: &[Finder<'_>],
) -> Vec<u32> {
    let mut matches = Vec::with_capacity((end - start) as usize);
    for index in start..end {
        let lower_name = RecordView::new(buffer, item_base, stride, index).lower_name_bytes();
        if needles.iter().all(|needle| needle.find(lower_name).is_some()) {
            matches.push(index);
        }
    }
    matches
}

/// Finds the first record whose path bytes equal `target` exactly.
pub fn lookup_path(
    buffer: &[u8],
    item_base: usize,
    stride: usize,
    count: u32,
    target: &[u8],
) -> Option<u32> {
    for index in 0..count {
        let view = RecordView::new(buffer, item_base, stride, index);
        let range = view.path_range();
        if range.len() == target.len() && view.path_bytes() == target {
            return Some(index);
        }
    }
    None
}

/// Sorts the index array in place by the named key.
///
/// Name and path compare byte-lexicographically with length as the
/// tiebreaker (memcmp order); size is a signed 64-bit compare; date is a
/// total-order float compare. Stability is not guaranteed.
pub fn sort_indices(
    indices: &mut [u32],
    buffer: &[u8],
    item_base: usize,
    stride: usize,
    key: SortKey,
    ascending: bool,
) {
    let compare = |a: &u32, b: &u32| -> Ordering {
        let left = RecordView::new(buffer, item_base, stride, *a);
        let right = RecordView::new(buffer, item_base, stride, *b);
        compare_views(left, right, key)
    };
    if ascending {
        indices.sort_unstable_by(compare);
    } else {
        indices.sort_unstable_by(|a, b| compare(a, b).reverse());
    }
}

/// Compares one snapshot record against an in-memory item on `key`.
///
/// The comparison basis is byte-identical to [`sort_indices`] so the
/// snapshot and overlay orderings agree bit-for-bit during the merge.
pub fn compare_record(
    buffer: &[u8],
    item_base: usize,
    stride: usize,
    index: u32,
    item: &Item,
    key: SortKey,
) -> Ordering {
    let view = RecordView::new(buffer, item_base, stride, index);
    match key {
        SortKey::Name => view.name_bytes().cmp(item.name.as_bytes()),
        SortKey::Path => view.path_bytes().cmp(item.path.as_bytes()),
        SortKey::Size => view.size().cmp(&item.size),
        SortKey::Date => view.mtime().total_cmp(&item.mtime_secs()),
    }
}

fn compare_views(left: RecordView<'_>, right: RecordView<'_>, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => left.name_bytes().cmp(right.name_bytes()),
        SortKey::Path => left.path_bytes().cmp(right.path_bytes()),
        SortKey::Size => left.size().cmp(&right.size()),
        SortKey::Date => left.mtime().total_cmp(&right.mtime()),
    }
}
