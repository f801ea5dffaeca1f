//! Hash-map backed local container

use std::collections::HashMap;

use ahash::RandomState;

use super::LocalContainer;

/// Load factor of the std swiss table once it has at least 8 buckets
const MAX_LOAD_FACTOR: f64 = 0.875;

/// K-mer counts in an ahash `HashMap`
pub struct HashCounter {
    map: HashMap<u64, u32, RandomState>,
}

impl HashCounter {
    /// Create an empty counter; iteration order depends only on `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            map: HashMap::with_hasher(RandomState::with_seeds(seed, !seed, seed, !seed)),
        }
    }

    /// Count of `key`, or zero
    #[cfg(test)]
    pub fn get(&self, key: u64) -> u32 {
        self.map.get(&key).copied().unwrap_or(0)
    }
}

impl LocalContainer for HashCounter {
    fn len(&self) -> usize {
        self.map.len()
    }

    fn bucket_count(&self) -> usize {
        let capacity = self.map.capacity();
        if capacity == 0 {
            0
        } else {
            (capacity as f64 / MAX_LOAD_FACTOR).ceil() as usize
        }
    }

    fn max_load_factor(&self) -> f64 {
        MAX_LOAD_FACTOR
    }

    fn entry_bytes(&self) -> usize {
        std::mem::size_of::<(u64, u32)>()
    }

    fn grows_by_doubling(&self) -> bool {
        true
    }

    fn resize(&mut self, entries: usize) {
        if entries > self.map.len() {
            self.map.reserve(entries - self.map.len());
        }
    }

    fn count_all(&mut self, keys: &[u64]) {
        for &key in keys {
            let count = self.map.entry(key).or_insert(0);
            *count = count.saturating_add(1);
        }
    }

    fn for_each_entry(&self, f: &mut dyn FnMut(u64, u32)) {
        for (&key, &count) in &self.map {
            f(key, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_len() {
        let mut counter = HashCounter::new(3);
        assert!(counter.is_empty());
        counter.count_all(&[1, 2, 2, 3, 3, 3]);
        assert_eq!(counter.len(), 3);
        assert_eq!(counter.get(3), 3);
        assert_eq!(counter.get(4), 0);
        assert!(counter.contiguous_bytes().is_none());
    }

    #[test]
    fn test_resize_reserves_buckets() {
        let mut counter = HashCounter::new(3);
        assert_eq!(counter.bucket_count(), 0);
        counter.resize(1000);
        let buckets = counter.bucket_count();
        assert!(buckets as f64 * counter.max_load_factor() >= 1000.0);
        // shrinking requests are ignored
        counter.resize(10);
        assert_eq!(counter.bucket_count(), buckets);
    }

    #[test]
    fn test_same_seed_same_order() {
        let mut a = HashCounter::new(11);
        let mut b = HashCounter::new(11);
        let keys: Vec<u64> = (0..500).map(|i| i * 7919).collect();
        a.count_all(&keys);
        b.count_all(&keys);
        let mut order_a = Vec::new();
        let mut order_b = Vec::new();
        a.for_each_entry(&mut |k, _| order_a.push(k));
        b.for_each_entry(&mut |k, _| order_b.push(k));
        assert_eq!(order_a, order_b);
    }
}
