//! Sorted-array local container
//!
//! Entries are kept sorted by key in the on-disk record layout, so the output
//! engine can write the backing array directly. Each insert sorts the incoming
//! batch in parallel and merges it into the existing array in one pass.

use rayon::prelude::*;

use super::LocalContainer;
use crate::record::{records_as_bytes, CountRecord};

/// K-mer counts as a sorted vector of packed records
#[derive(Default)]
pub struct SortedCounter {
    records: Vec<CountRecord>,
}

impl SortedCounter {
    /// Create an empty counter
    pub fn new() -> Self {
        Self::default()
    }

    /// The sorted records
    pub fn records(&self) -> &[CountRecord] {
        &self.records
    }

    /// Collapse a sorted key batch into (key, run length) records
    fn run_lengths(sorted: &[u64]) -> Vec<CountRecord> {
        let mut runs: Vec<CountRecord> = Vec::new();
        for &key in sorted {
            match runs.last_mut() {
                Some(last) if { last.key } == key => {
                    last.count = last.count.saturating_add(1);
                }
                _ => runs.push(CountRecord::new(key, 1)),
            }
        }
        runs
    }
}

impl LocalContainer for SortedCounter {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn bucket_count(&self) -> usize {
        self.records.capacity()
    }

    fn max_load_factor(&self) -> f64 {
        1.0
    }

    fn entry_bytes(&self) -> usize {
        std::mem::size_of::<CountRecord>()
    }

    fn grows_by_doubling(&self) -> bool {
        false
    }

    fn resize(&mut self, entries: usize) {
        if entries > self.records.len() {
            self.records.reserve(entries - self.records.len());
        }
    }

    fn count_all(&mut self, keys: &[u64]) {
        if keys.is_empty() {
            return;
        }
        let mut batch = keys.to_vec();
        batch.par_sort_unstable();
        let incoming = Self::run_lengths(&batch);
        drop(batch);

        let existing = std::mem::take(&mut self.records);
        let mut merged = Vec::with_capacity(existing.len() + incoming.len());
        let (mut a, mut b) = (0, 0);
        while a < existing.len() && b < incoming.len() {
            let (ka, kb) = (existing[a].key, incoming[b].key);
            if ka < kb {
                merged.push(existing[a]);
                a += 1;
            } else if kb < ka {
                merged.push(incoming[b]);
                b += 1;
            } else {
                let count = existing[a].count.saturating_add(incoming[b].count);
                merged.push(CountRecord::new(ka, count));
                a += 1;
                b += 1;
            }
        }
        merged.extend_from_slice(&existing[a..]);
        merged.extend_from_slice(&incoming[b..]);
        self.records = merged;
    }

    fn contiguous_bytes(&self) -> Option<&[u8]> {
        Some(records_as_bytes(&self.records))
    }

    fn for_each_entry(&self, f: &mut dyn FnMut(u64, u32)) {
        for record in &self.records {
            f(record.key, record.count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{decode_records, RECORD_SIZE};

    #[test]
    fn test_merge_keeps_sorted_unique() {
        let mut counter = SortedCounter::new();
        counter.count_all(&[9, 3, 3, 7]);
        counter.count_all(&[1, 3, 9, 9, 12]);

        let pairs: Vec<(u64, u32)> = counter.records().iter().map(|r| (r.key, r.count)).collect();
        assert_eq!(pairs, vec![(1, 1), (3, 3), (7, 1), (9, 3), (12, 1)]);
    }

    #[test]
    fn test_contiguous_bytes_are_records() {
        let mut counter = SortedCounter::new();
        counter.count_all(&[4, 2, 4]);
        let bytes = counter.contiguous_bytes().unwrap();
        assert_eq!(bytes.len(), 2 * RECORD_SIZE);
        let decoded = decode_records(bytes).unwrap();
        assert_eq!(decoded, vec![CountRecord::new(2, 1), CountRecord::new(4, 2)]);
    }

    #[test]
    fn test_empty_insert_is_noop() {
        let mut counter = SortedCounter::new();
        counter.count_all(&[]);
        assert!(counter.is_empty());
        assert_eq!(counter.contiguous_bytes().unwrap().len(), 0);
    }
}
