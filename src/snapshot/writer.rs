//! Serializes a full item set to the on-disk snapshot format.
//!
//! The write is atomic: the file is assembled in a temporary file in the
//! destination directory, fsynced, and renamed over the destination.
//! Readers see either the old snapshot or the new one, never a torn file.

use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use super::format::{encode_header, encode_record, RecordFlags, HEADER_BYTES, RECORD_STRIDE};
use crate::error::{Result, SearchError};
use crate::types::Item;

/// Writes `items` as a snapshot file at `dest`.
///
/// Items are sorted by name bytes (path as secondary key, so snapshots of
/// the same item set are byte-identical across rebuilds). Strings are not
/// deduplicated in the pool; the writer stays simple and linear scans stay
/// contiguous at the cost of a larger file.
pub fn write_snapshot(mut items: Vec<Item>, dest: &Path) -> Result<()> {
    items.sort_unstable_by(|a, b| {
        a.name
            .as_bytes()
            .cmp(b.name.as_bytes())
            .then_with(|| a.path.as_bytes().cmp(b.path.as_bytes()))
    });

    let count = items.len();
    let pool_base = HEADER_BYTES + count * RECORD_STRIDE;

    // String pool and record array are assembled together: each record
    // stores absolute file offsets into the pool region.
    let mut pool: Vec<u8> = Vec::new();
    let mut records: Vec<u8> = Vec::with_capacity(count * RECORD_STRIDE);

    for item in &items {
        let (name_offset, name_len) = append_pool(&mut pool, pool_base, item.name.as_bytes())?;
        let (path_offset, path_len) = append_pool(&mut pool, pool_base, item.path.as_bytes())?;
        let lower_name = item.name.to_ascii_lowercase();
        let (lower_offset, lower_len) = append_pool(&mut pool, pool_base, lower_name.as_bytes())?;

        let flags = if item.is_directory {
            RecordFlags::DIRECTORY
        } else {
            RecordFlags::empty()
        };
        records.extend_from_slice(&encode_record(
            item.size,
            item.modified_at.unwrap_or(0.0),
            flags,
            name_offset,
            name_len,
            path_offset,
            path_len,
            lower_offset,
            lower_len,
        ));
    }

    let parent = dest.parent().ok_or_else(|| {
        SearchError::WriteFailed(format!(
            "snapshot destination has no parent directory: {}",
            dest.display()
        ))
    })?;
    std::fs::create_dir_all(parent)
        .map_err(|error| SearchError::WriteFailed(format!("create {}: {error}", parent.display())))?;

    let tmp = NamedTempFile::new_in(parent)
        .map_err(|error| SearchError::WriteFailed(format!("create temp file: {error}")))?;
    {
        let mut output = BufWriter::new(tmp.as_file());
        output
            .write_all(&encode_header(count as i64))
            .and_then(|()| output.write_all(&records))
            .and_then(|()| output.write_all(&pool))
            .and_then(|()| output.flush())
            .map_err(|error| SearchError::WriteFailed(format!("write snapshot: {error}")))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|error| SearchError::WriteFailed(format!("fsync snapshot: {error}")))?;
    tmp.persist(dest).map_err(|error| {
        SearchError::WriteFailed(format!("rename into {}: {}", dest.display(), error.error))
    })?;

    log::debug!(
        "wrote snapshot dest={} records={} pool_bytes={}",
        dest.display(),
        count,
        pool.len()
    );
    Ok(())
}

/// Appends bytes to the pool, returning the absolute file offset and the
/// byte length of the appended run.
fn append_pool(pool: &mut Vec<u8>, pool_base: usize, bytes: &[u8]) -> Result<(u32, u32)> {
    let offset = pool_base + pool.len();
    if offset + bytes.len() > u32::MAX as usize {
        return Err(SearchError::WriteFailed(
            "string pool exceeds the 4 GiB offset range".to_string(),
        ));
    }
    pool.extend_from_slice(bytes);
    Ok((offset as u32, bytes.len() as u32))
}
