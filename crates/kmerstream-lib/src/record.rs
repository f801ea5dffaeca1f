//! Fixed-stride output records
//!
//! Layout per record, native byte order, no padding:
//! key `u64` (8 bytes) followed by count `u32` (4 bytes) = 12 bytes.
//! Files hold nothing else: no header, no framing, no checksum.

use crate::error::{IngestError, Result};

/// Bytes per key
pub const KEY_BYTES: usize = 8;
/// Bytes per count
pub const COUNT_BYTES: usize = 4;
/// Size of one record in bytes
pub const RECORD_SIZE: usize = KEY_BYTES + COUNT_BYTES;

/// One (k-mer, count) entry, laid out exactly as on disk
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRecord {
    /// Packed k-mer
    pub key: u64,
    /// Occurrences
    pub count: u32,
}

const _: () = assert!(std::mem::size_of::<CountRecord>() == RECORD_SIZE);

impl CountRecord {
    /// Create a record
    #[inline]
    pub fn new(key: u64, count: u32) -> Self {
        Self { key, count }
    }

    /// Serialize to the on-disk layout
    #[inline]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        let (key, count) = (self.key, self.count);
        buf[..KEY_BYTES].copy_from_slice(&key.to_ne_bytes());
        buf[KEY_BYTES..].copy_from_slice(&count.to_ne_bytes());
        buf
    }

    /// Deserialize from the on-disk layout
    #[inline]
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut key = [0u8; KEY_BYTES];
        let mut count = [0u8; COUNT_BYTES];
        key.copy_from_slice(&bytes[..KEY_BYTES]);
        count.copy_from_slice(&bytes[KEY_BYTES..]);
        Self {
            key: u64::from_ne_bytes(key),
            count: u32::from_ne_bytes(count),
        }
    }
}

/// View a slice of records as their on-disk bytes, without copying
pub fn records_as_bytes(records: &[CountRecord]) -> &[u8] {
    // SAFETY: CountRecord is repr(C, packed) with no padding and only plain
    // integer fields, so every byte of the slice is initialized, and u8 has
    // alignment 1.
    unsafe {
        std::slice::from_raw_parts(
            records.as_ptr() as *const u8,
            std::mem::size_of_val(records),
        )
    }
}

/// Serializes records into a buffer sized up front for an exact count
///
/// Writing more records than declared, or finishing with fewer, is an error:
/// the byte length of a rank's blob must equal `records * RECORD_SIZE`.
pub struct RecordWriter {
    buf: Vec<u8>,
    expected: usize,
}

impl RecordWriter {
    /// Create a writer for exactly `records` records
    pub fn with_records(records: usize) -> Self {
        Self {
            buf: Vec::with_capacity(records * RECORD_SIZE),
            expected: records,
        }
    }

    /// Records written so far
    pub fn written(&self) -> usize {
        self.buf.len() / RECORD_SIZE
    }

    /// Byte offset the next record will be written at
    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    /// Append one record
    pub fn push(&mut self, key: u64, count: u32) -> Result<()> {
        if self.written() >= self.expected {
            return Err(IngestError::Layout(format!(
                "record {} exceeds the declared {} records",
                self.written(),
                self.expected
            )));
        }
        self.buf.extend_from_slice(&CountRecord::new(key, count).to_bytes());
        Ok(())
    }

    /// Take the finished blob
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.buf.len() != self.expected * RECORD_SIZE {
            return Err(IngestError::Layout(format!(
                "wrote {} records, declared {}",
                self.written(),
                self.expected
            )));
        }
        Ok(self.buf)
    }
}

/// Decode a blob of records; the length must be a multiple of the stride
pub fn decode_records(bytes: &[u8]) -> Result<Vec<CountRecord>> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(IngestError::Layout(format!(
            "{} bytes is not a multiple of the {}-byte record",
            bytes.len(),
            RECORD_SIZE
        )));
    }
    Ok(bytes
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| {
            let mut buf = [0u8; RECORD_SIZE];
            buf.copy_from_slice(chunk);
            CountRecord::from_bytes(&buf)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let record = CountRecord::new(0x0102_0304_0506_0708, 0x0a0b_0c0d);
        let bytes = record.to_bytes();
        assert_eq!(&bytes[..8], &0x0102_0304_0506_0708u64.to_ne_bytes());
        assert_eq!(&bytes[8..], &0x0a0b_0c0du32.to_ne_bytes());
        assert_eq!(CountRecord::from_bytes(&bytes), record);
    }

    #[test]
    fn test_slice_view_matches_serialized() {
        let records = vec![CountRecord::new(1, 2), CountRecord::new(u64::MAX, 7)];
        let mut writer = RecordWriter::with_records(2);
        for r in &records {
            let (key, count) = (r.key, r.count);
            writer.push(key, count).unwrap();
        }
        assert_eq!(records_as_bytes(&records), writer.finish().unwrap().as_slice());
    }

    #[test]
    fn test_writer_enforces_declared_count() {
        let mut writer = RecordWriter::with_records(1);
        writer.push(1, 1).unwrap();
        assert_eq!(writer.offset(), RECORD_SIZE);
        assert!(matches!(writer.push(2, 2), Err(IngestError::Layout(_))));

        let short = RecordWriter::with_records(3);
        assert!(short.finish().is_err());
    }

    #[test]
    fn test_decode_rejects_partial_record() {
        assert!(decode_records(&[0u8; 13]).is_err());
        assert!(decode_records(&[]).unwrap().is_empty());
    }
}
