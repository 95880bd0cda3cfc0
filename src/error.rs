use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot file not found: {0}")]
    SnapshotAbsent(PathBuf),

    #[error("corrupt or incompatible snapshot: {0}")]
    SnapshotCorrupt(String),

    #[error("snapshot write failed: {0}")]
    WriteFailed(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SearchError>;

/// Builds the error reported when a poisoned lock is encountered.
pub fn lock_poisoned_error(what: &str) -> SearchError {
    SearchError::Internal(format!("{what} lock was poisoned"))
}

/// Canonicalizes a path, returning the original if canonicalization fails.
///
/// Path strings are primary keys across the catalog, the overlay, and the
/// snapshot; every component that produces a path must normalize through
/// this one function.
pub fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}
