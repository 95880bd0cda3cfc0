//! Filesystem path utilities shared by the crawler and the watcher.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Checks if a path is within the indexed scope of a root.
pub fn path_in_scope(root: &Path, candidate: &Path) -> bool {
    candidate == root || candidate.starts_with(root)
}

/// Checks if a path falls under any excluded prefix.
pub fn path_is_excluded(excluded_roots: &[PathBuf], candidate: &Path) -> bool {
    excluded_roots
        .iter()
        .any(|excluded| candidate == excluded || candidate.starts_with(excluded))
}

/// Computes the minimal set of paths that must be re-examined for a batch
/// of filesystem events.
///
/// 1. Sort paths by depth (shallowest first), then lexicographically
/// 2. Use a HashSet for O(1) ancestor lookup
/// 3. For each path, walk up the parent chain; skip paths already covered
///    by a selected ancestor
///
/// Re-examining the returned cover observes every change from the input
/// batch. Complexity is O(n log n + n * depth), which beats the naive
/// O(n²) `starts_with` scan on event storms.
pub fn coalesce_event_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    if paths.len() <= 1 {
        return paths;
    }

    let mut candidates: Vec<(PathBuf, usize)> = paths
        .into_iter()
        .map(|path| {
            let depth = path.components().count();
            (path, depth)
        })
        .collect();

    // Shallowest ancestors first, then by path for determinism.
    candidates.sort_unstable_by(|(path_a, depth_a), (path_b, depth_b)| {
        depth_a.cmp(depth_b).then_with(|| path_a.cmp(path_b))
    });
    candidates.dedup_by(|(path_a, _), (path_b, _)| path_a == path_b);

    let mut selected = Vec::with_capacity(candidates.len());
    let mut selected_set = HashSet::with_capacity(candidates.len());

    for (path, _depth) in candidates {
        if has_selected_ancestor(&path, &selected_set) {
            continue;
        }
        selected_set.insert(path.clone());
        selected.push(path);
    }

    selected
}

/// Checks if any ancestor of `path` is in the selected set.
fn has_selected_ancestor(path: &Path, selected: &HashSet<PathBuf>) -> bool {
    if selected.is_empty() {
        return false;
    }
    if selected.contains(path) {
        return true;
    }
    let mut ancestor = path.to_path_buf();
    while ancestor.pop() {
        if selected.contains(&ancestor) {
            return true;
        }
    }
    false
}
