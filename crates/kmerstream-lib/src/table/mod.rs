//! Distributed k-mer count table
//!
//! Each rank owns the keys that hash to it and keeps them in a local
//! container. Inserting is collective: staged keys are exchanged so that each
//! key reaches its owner, then counted locally.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::comm::{Communicator, ReduceOp};
use crate::error::ConfigError;
use crate::hasher::DeterministicHasher;

mod hash_counter;
mod sorted_counter;

pub use hash_counter::HashCounter;
pub use sorted_counter::SortedCounter;

/// Rank-local storage behind a [`DistributedCountTable`]
pub trait LocalContainer: Send {
    /// Number of distinct keys held
    fn len(&self) -> usize;

    /// True if no key is held
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots currently allocated
    fn bucket_count(&self) -> usize;

    /// Fraction of `bucket_count` that may be filled before the container grows
    fn max_load_factor(&self) -> f64;

    /// Bytes one slot occupies
    fn entry_bytes(&self) -> usize;

    /// True if the container grows by doubling its bucket count
    ///
    /// Array-backed containers grow by exactly what is inserted instead.
    fn grows_by_doubling(&self) -> bool;

    /// Make room for at least `entries` distinct keys
    fn resize(&mut self, entries: usize);

    /// Add one occurrence of every key in `keys`
    fn count_all(&mut self, keys: &[u64]);

    /// The entries as on-disk records, if they are already stored that way
    fn contiguous_bytes(&self) -> Option<&[u8]> {
        None
    }

    /// Visit every (key, count) entry
    fn for_each_entry(&self, f: &mut dyn FnMut(u64, u32));
}

impl LocalContainer for Box<dyn LocalContainer> {
    fn len(&self) -> usize {
        (**self).len()
    }
    fn bucket_count(&self) -> usize {
        (**self).bucket_count()
    }
    fn max_load_factor(&self) -> f64 {
        (**self).max_load_factor()
    }
    fn entry_bytes(&self) -> usize {
        (**self).entry_bytes()
    }
    fn grows_by_doubling(&self) -> bool {
        (**self).grows_by_doubling()
    }
    fn resize(&mut self, entries: usize) {
        (**self).resize(entries)
    }
    fn count_all(&mut self, keys: &[u64]) {
        (**self).count_all(keys)
    }
    fn contiguous_bytes(&self) -> Option<&[u8]> {
        (**self).contiguous_bytes()
    }
    fn for_each_entry(&self, f: &mut dyn FnMut(u64, u32)) {
        (**self).for_each_entry(f)
    }
}

/// Which local container to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableKind {
    /// Hash map, grows by doubling
    #[default]
    Hash,
    /// Sorted packed array, written out without a copy
    Sorted,
}

impl TableKind {
    /// Create an empty container of this kind
    pub fn new_container(self, seed: u64) -> Box<dyn LocalContainer> {
        match self {
            TableKind::Hash => Box::new(HashCounter::new(seed)),
            TableKind::Sorted => Box::new(SortedCounter::new()),
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Hash => write!(f, "hash"),
            TableKind::Sorted => write!(f, "sorted"),
        }
    }
}

impl FromStr for TableKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hash" => Ok(TableKind::Hash),
            "sorted" => Ok(TableKind::Sorted),
            other => Err(ConfigError::Invalid(format!(
                "unknown table kind {other:?} (expected hash or sorted)"
            ))),
        }
    }
}

/// K-mer counts sharded across ranks by key hash
pub struct DistributedCountTable<M> {
    local: M,
    hasher: DeterministicHasher,
}

impl<M: LocalContainer> DistributedCountTable<M> {
    /// Wrap a local container; `seed` must be the same on every rank
    pub fn new(local: M, seed: u64) -> Self {
        Self {
            local,
            hasher: DeterministicHasher::new(seed),
        }
    }

    /// Route each key to its owner and count it there (collective)
    ///
    /// Returns the number of keys this rank received.
    pub fn insert<C: Communicator>(&mut self, keys: &[u64], comm: &C) -> usize {
        let size = comm.size();
        let mut outgoing: Vec<Vec<u8>> = vec![Vec::new(); size];
        for &key in keys {
            let owner = self.hasher.owner(key, size);
            outgoing[owner].extend_from_slice(&key.to_ne_bytes());
        }

        let incoming = comm.all_to_all_bytes(outgoing);
        let received: Vec<u64> = incoming
            .iter()
            .flat_map(|bytes| bytes.chunks_exact(8))
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                u64::from_ne_bytes(buf)
            })
            .collect();

        debug!(
            "rank {} received {} keys, sent {}",
            comm.rank(),
            received.len(),
            keys.len()
        );
        self.local.count_all(&received);
        received.len()
    }

    /// Distinct keys over all ranks (collective)
    pub fn size<C: Communicator>(&self, comm: &C) -> u64 {
        comm.all_reduce_u64(self.local.len() as u64, ReduceOp::Sum)
    }

    /// Distinct keys held by this rank
    pub fn local_size(&self) -> usize {
        self.local.len()
    }

    /// Rank that owns `key`
    pub fn owner(&self, key: u64, size: usize) -> usize {
        self.hasher.owner(key, size)
    }

    /// The local container
    pub fn local(&self) -> &M {
        &self.local
    }

    /// The local container, mutably
    pub fn local_mut(&mut self) -> &mut M {
        &mut self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{run_ranks, SelfComm};
    use std::collections::BTreeMap;

    fn entries<M: LocalContainer>(local: &M) -> BTreeMap<u64, u32> {
        let mut out = BTreeMap::new();
        local.for_each_entry(&mut |k, c| {
            out.insert(k, c);
        });
        out
    }

    #[test]
    fn test_table_kind_parse() {
        assert_eq!("hash".parse::<TableKind>().unwrap(), TableKind::Hash);
        assert_eq!("sorted".parse::<TableKind>().unwrap(), TableKind::Sorted);
        assert!("robinhood".parse::<TableKind>().is_err());
        assert_eq!(TableKind::Sorted.to_string(), "sorted");
    }

    #[test]
    fn test_single_rank_insert() {
        let mut table = DistributedCountTable::new(TableKind::Hash.new_container(1), 1);
        assert_eq!(table.insert(&[5, 5, 9], &SelfComm), 3);
        assert_eq!(table.size(&SelfComm), 2);
        let counts = entries(table.local());
        assert_eq!(counts[&5], 2);
        assert_eq!(counts[&9], 1);
    }

    #[test]
    fn test_keys_end_up_on_their_owner() {
        for kind in [TableKind::Hash, TableKind::Sorted] {
            let results = run_ranks(3, 3, |comm| {
                let mut table = DistributedCountTable::new(kind.new_container(7), 7);
                // every rank stages the same keys, so each count is 3
                let keys: Vec<u64> = (0..40).collect();
                table.insert(&keys, &comm);
                let global = table.size(&comm);
                let owners_ok = {
                    let mut ok = true;
                    table.local().for_each_entry(&mut |k, c| {
                        ok &= table.owner(k, 3) == comm.rank() && c == 3;
                    });
                    ok
                };
                (global, table.local_size(), owners_ok)
            })
            .unwrap();

            let local_total: usize = results.iter().map(|r| r.1).sum();
            assert_eq!(local_total, 40);
            for (global, _, owners_ok) in results {
                assert_eq!(global, 40);
                assert!(owners_ok, "{kind} table kept a key it does not own");
            }
        }
    }
}
