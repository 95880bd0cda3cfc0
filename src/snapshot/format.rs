//! On-disk snapshot layout.
//!
//! The file is header, packed record array, then a UTF-8 string pool:
//!
//! ```text
//! | magic "ERRT" (4) | version i32 (4) | count i64 (8) |
//! | record 0 (48) | record 1 (48) | ... | record count-1 (48) |
//! | string pool (raw UTF-8, lengths explicit) |
//! ```
//!
//! Records are sorted by name in memcmp order at write time. All
//! multi-byte integers and floats are little-endian. String offsets are
//! absolute file offsets into the pool region.

use std::ops::Range;

use bitflags::bitflags;

/// Magic tag in the first four bytes of a snapshot file.
pub const MAGIC: [u8; 4] = *b"ERRT";

/// Snapshot format version.
pub const FORMAT_VERSION: i32 = 2;

/// Header length in bytes: magic (4) + version (4) + count (8).
pub const HEADER_BYTES: usize = 16;

/// Fixed per-record byte width in the packed array.
pub const RECORD_STRIDE: usize = 48;

// Record field offsets.
const FIELD_SIZE: usize = 0;
const FIELD_MTIME: usize = 8;
const FIELD_FLAGS: usize = 16;
const FIELD_NAME_OFFSET: usize = 20;
const FIELD_NAME_LEN: usize = 24;
const FIELD_PATH_OFFSET: usize = 28;
const FIELD_PATH_LEN: usize = 32;
const FIELD_LOWER_NAME_OFFSET: usize = 36;
const FIELD_LOWER_NAME_LEN: usize = 40;

bitflags! {
    /// Flags byte at record offset 16. Bits 1..7 are reserved and written
    /// as zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u8 {
        const DIRECTORY = 0b0000_0001;
    }
}

/// Read-only view of one packed record inside a snapshot buffer.
///
/// Field reads index the buffer directly; constructing a view for an
/// index past the record array is a programming error and panics.
#[derive(Clone, Copy)]
pub struct RecordView<'a> {
    buffer: &'a [u8],
    base: usize,
}

impl<'a> RecordView<'a> {
    /// Creates a view of the record at `index` in the packed array
    /// starting at `item_base`.
    #[inline]
    pub fn new(buffer: &'a [u8], item_base: usize, stride: usize, index: u32) -> Self {
        Self {
            buffer,
            base: item_base + index as usize * stride,
        }
    }

    #[inline]
    fn read_u32(&self, field: usize) -> u32 {
        let at = self.base + field;
        u32::from_le_bytes(self.buffer[at..at + 4].try_into().unwrap())
    }

    #[inline]
    pub fn size(&self) -> i64 {
        let at = self.base + FIELD_SIZE;
        i64::from_le_bytes(self.buffer[at..at + 8].try_into().unwrap())
    }

    /// Modification time in seconds since the epoch; 0.0 means absent.
    #[inline]
    pub fn mtime(&self) -> f64 {
        let at = self.base + FIELD_MTIME;
        f64::from_le_bytes(self.buffer[at..at + 8].try_into().unwrap())
    }

    #[inline]
    pub fn flags(&self) -> RecordFlags {
        RecordFlags::from_bits_truncate(self.buffer[self.base + FIELD_FLAGS])
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        self.flags().contains(RecordFlags::DIRECTORY)
    }

    #[inline]
    pub fn name_range(&self) -> Range<usize> {
        let offset = self.read_u32(FIELD_NAME_OFFSET) as usize;
        offset..offset + self.read_u32(FIELD_NAME_LEN) as usize
    }

    #[inline]
    pub fn path_range(&self) -> Range<usize> {
        let offset = self.read_u32(FIELD_PATH_OFFSET) as usize;
        offset..offset + self.read_u32(FIELD_PATH_LEN) as usize
    }

    #[inline]
    pub fn lower_name_range(&self) -> Range<usize> {
        let offset = self.read_u32(FIELD_LOWER_NAME_OFFSET) as usize;
        offset..offset + self.read_u32(FIELD_LOWER_NAME_LEN) as usize
    }

    /// Name bytes, or an empty slice if the stored range is out of
    /// bounds (a malformed record).
    #[inline]
    pub fn name_bytes(&self) -> &'a [u8] {
        self.buffer.get(self.name_range()).unwrap_or(&[])
    }

    #[inline]
    pub fn path_bytes(&self) -> &'a [u8] {
        self.buffer.get(self.path_range()).unwrap_or(&[])
    }

    #[inline]
    pub fn lower_name_bytes(&self) -> &'a [u8] {
        self.buffer.get(self.lower_name_range()).unwrap_or(&[])
    }
}

/// Encodes one record into a 48-byte array.
///
/// String offsets are absolute file offsets; lengths are byte lengths.
#[allow(clippy::too_many_arguments)]
pub(super) fn encode_record(
    size: i64,
    mtime: f64,
    flags: RecordFlags,
    name_offset: u32,
    name_len: u32,
    path_offset: u32,
    path_len: u32,
    lower_name_offset: u32,
    lower_name_len: u32,
) -> [u8; RECORD_STRIDE] {
    let mut record = [0u8; RECORD_STRIDE];
    record[FIELD_SIZE..FIELD_SIZE + 8].copy_from_slice(&size.to_le_bytes());
    record[FIELD_MTIME..FIELD_MTIME + 8].copy_from_slice(&mtime.to_le_bytes());
    record[FIELD_FLAGS] = flags.bits();
    record[FIELD_NAME_OFFSET..FIELD_NAME_OFFSET + 4].copy_from_slice(&name_offset.to_le_bytes());
    record[FIELD_NAME_LEN..FIELD_NAME_LEN + 4].copy_from_slice(&name_len.to_le_bytes());
    record[FIELD_PATH_OFFSET..FIELD_PATH_OFFSET + 4].copy_from_slice(&path_offset.to_le_bytes());
    record[FIELD_PATH_LEN..FIELD_PATH_LEN + 4].copy_from_slice(&path_len.to_le_bytes());
    record[FIELD_LOWER_NAME_OFFSET..FIELD_LOWER_NAME_OFFSET + 4]
        .copy_from_slice(&lower_name_offset.to_le_bytes());
    record[FIELD_LOWER_NAME_LEN..FIELD_LOWER_NAME_LEN + 4]
        .copy_from_slice(&lower_name_len.to_le_bytes());
    record
}

/// Encodes the 16-byte file header.
pub(super) fn encode_header(count: i64) -> [u8; HEADER_BYTES] {
    let mut header = [0u8; HEADER_BYTES];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header[8..16].copy_from_slice(&count.to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip_through_view() {
        let mut buffer = vec![0u8; HEADER_BYTES];
        buffer.extend_from_slice(&encode_record(
            42,
            1234.5,
            RecordFlags::DIRECTORY,
            64,
            3,
            67,
            8,
            75,
            3,
        ));

        let view = RecordView::new(&buffer, HEADER_BYTES, RECORD_STRIDE, 0);
        assert_eq!(view.size(), 42);
        assert_eq!(view.mtime(), 1234.5);
        assert!(view.is_directory());
        assert_eq!(view.name_range(), 64..67);
        assert_eq!(view.path_range(), 67..75);
        assert_eq!(view.lower_name_range(), 75..78);
    }

    #[test]
    fn out_of_bounds_string_range_reads_empty() {
        let mut buffer = vec![0u8; HEADER_BYTES];
        buffer.extend_from_slice(&encode_record(
            0,
            0.0,
            RecordFlags::empty(),
            9999,
            10,
            9999,
            10,
            9999,
            10,
        ));

        let view = RecordView::new(&buffer, HEADER_BYTES, RECORD_STRIDE, 0);
        assert!(view.name_bytes().is_empty());
        assert!(view.path_bytes().is_empty());
        assert!(view.lower_name_bytes().is_empty());
    }

    #[test]
    fn header_encodes_magic_version_count() {
        let header = encode_header(7);
        assert_eq!(&header[0..4], b"ERRT");
        assert_eq!(i32::from_le_bytes(header[4..8].try_into().unwrap()), 2);
        assert_eq!(i64::from_le_bytes(header[8..16].try_into().unwrap()), 7);
    }
}
