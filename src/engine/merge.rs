//! Overlay matching and the snapshot/overlay result merge.
//!
//! The merge walks the sorted snapshot index vector and the sorted
//! overlay item vector with two pointers, comparing across the boundary
//! via the snapshot's byte-level comparator so both sides order on the
//! same basis. The output is the virtual result vector: non-negative
//! values are snapshot indices, negative values are the bitwise NOT of a
//! position in the overlay item vector.

use std::cmp::Ordering;

use memchr::memmem::Finder;

use crate::overlay::OverlayEntry;
use crate::snapshot::BinaryIndex;
use crate::types::{Item, SortKey};

/// Splits a query into lowercased whitespace tokens.
pub(super) fn query_tokens(query: &str) -> Vec<Vec<u8>> {
    query
        .split_whitespace()
        .map(|token| token.to_ascii_lowercase().into_bytes())
        .collect()
}

/// Token-AND match against an overlay entry's precomputed lowered name.
pub(super) fn overlay_matches(entry: &OverlayEntry, needles: &[Finder<'_>]) -> bool {
    let lower_name = entry.lower_name.as_bytes();
    needles.iter().all(|needle| needle.find(lower_name).is_some())
}

/// Compares two in-memory items on `key`, on the identical basis the
/// snapshot comparator uses: bytes for name/path, signed 64-bit for
/// size, total-order float for date.
pub(super) fn compare_items(a: &Item, b: &Item, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a.name.as_bytes().cmp(b.name.as_bytes()),
        SortKey::Path => a.path.as_bytes().cmp(b.path.as_bytes()),
        SortKey::Size => a.size.cmp(&b.size),
        SortKey::Date => a.mtime_secs().total_cmp(&b.mtime_secs()),
    }
}

/// Sorts the per-query overlay items by `key` and direction.
pub(super) fn sort_overlay_items(items: &mut [Item], key: SortKey, ascending: bool) {
    if ascending {
        items.sort_unstable_by(|a, b| compare_items(a, b, key));
    } else {
        items.sort_unstable_by(|a, b| compare_items(a, b, key).reverse());
    }
}

/// Two-pointer merge of sorted snapshot indices and sorted overlay items
/// into the encoded result vector. Ties emit the snapshot side first.
pub(super) fn merge_results(
    index: Option<&BinaryIndex>,
    snapshot_indices: &[u32],
    overlay_items: &[Item],
    key: SortKey,
    ascending: bool,
) -> Vec<i64> {
    let mut merged = Vec::with_capacity(snapshot_indices.len() + overlay_items.len());
    let mut snap = 0usize;
    let mut over = 0usize;

    while snap < snapshot_indices.len() && over < overlay_items.len() {
        // `index` is present whenever snapshot indices are non-empty.
        let Some(index) = index else { break };
        let ordering = index.compare(snapshot_indices[snap], &overlay_items[over], key);
        let effective = if ascending { ordering } else { ordering.reverse() };
        if effective != Ordering::Greater {
            merged.push(snapshot_indices[snap] as i64);
            snap += 1;
        } else {
            merged.push(!(over as i64));
            over += 1;
        }
    }
    while snap < snapshot_indices.len() {
        merged.push(snapshot_indices[snap] as i64);
        snap += 1;
    }
    while over < overlay_items.len() {
        merged.push(!(over as i64));
        over += 1;
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, path: &str, size: i64, mtime: Option<f64>) -> Item {
        Item {
            path: path.to_string(),
            name: name.to_string(),
            is_directory: false,
            size,
            modified_at: mtime,
        }
    }

    #[test]
    fn overlay_only_merge_encodes_bitwise_not_positions() {
        let items = vec![item("a", "/a", 1, None), item("b", "/b", 2, None)];
        let merged = merge_results(None, &[], &items, SortKey::Name, true);
        assert_eq!(merged, vec![!0i64, !1i64]);
    }

    #[test]
    fn compare_items_orders_names_bytewise() {
        let short = item("Ab", "/1", 0, None);
        let long = item("Abc", "/2", 0, None);
        // Shorter is smaller when one is a prefix of the other.
        assert_eq!(compare_items(&short, &long, SortKey::Name), Ordering::Less);
    }

    #[test]
    fn compare_items_treats_absent_date_as_earliest() {
        let dated = item("a", "/1", 0, Some(50.0));
        let undated = item("b", "/2", 0, None);
        assert_eq!(
            compare_items(&undated, &dated, SortKey::Date),
            Ordering::Less
        );
    }

    #[test]
    fn sort_overlay_items_respects_direction() {
        let mut items = vec![
            item("c", "/c", 10, None),
            item("a", "/a", 2, None),
            item("b", "/b", 50, None),
        ];
        sort_overlay_items(&mut items, SortKey::Size, false);
        let sizes: Vec<i64> = items.iter().map(|i| i.size).collect();
        assert_eq!(sizes, [50, 10, 2]);
    }

    #[test]
    fn query_tokens_lowercase_and_split() {
        assert_eq!(
            query_tokens("  Foo  BAR "),
            vec![b"foo".to_vec(), b"bar".to_vec()]
        );
        assert!(query_tokens("   ").is_empty());
    }
}
