//! Hash functions for k-mer routing and cardinality estimation
//!
//! `DeterministicHasher` wraps a seeded ahash state so that every rank computes
//! the same hash for the same key, which is what makes key ownership agree
//! across ranks. `IdentityHash` passes primitive values through unchanged; the
//! register estimator treats it specially because its high bits are mostly zero.

use ahash::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

/// A hash function usable by the register estimator
pub trait KeyHash<T: ?Sized> {
    /// True when the function does not diffuse bits (identity-like)
    const PASS_THROUGH: bool = false;

    /// Number of meaningful bits produced for `T`
    const DATA_BITS: u8 = 64;

    /// Hash one value
    fn hash_key(&self, value: &T) -> u64;
}

/// A deterministic hasher with a seeded state
#[derive(Clone)]
pub struct DeterministicHasher {
    seed: u64,
    state: RandomState,
}

impl DeterministicHasher {
    /// Create a new deterministic hasher with the given seed
    pub fn new(seed: u64) -> Self {
        let state = RandomState::with_seeds(seed, !seed, seed, !seed);
        Self { seed, state }
    }

    /// Hash a u64 value using a seeded AHasher
    #[inline]
    pub fn hash_u64(&self, value: u64) -> u64 {
        let mut hasher = self.state.build_hasher();
        hasher.write_u64(value);
        hasher.finish()
    }

    /// Rank that owns `key` in a run of `size` ranks
    #[inline]
    pub fn owner(&self, key: u64, size: usize) -> usize {
        (self.hash_u64(key) % size as u64) as usize
    }

    /// Get the seed value
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Default for DeterministicHasher {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_SEED)
    }
}

impl<T: Hash + ?Sized> KeyHash<T> for DeterministicHasher {
    #[inline]
    fn hash_key(&self, value: &T) -> u64 {
        self.state.hash_one(value)
    }
}

/// Pass-through hash for unsigned primitives
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityHash;

macro_rules! impl_identity_hash {
    ($($t:ty),* $(,)?) => {
        $(
            impl KeyHash<$t> for IdentityHash {
                const PASS_THROUGH: bool = true;
                const DATA_BITS: u8 = <$t>::BITS as u8;

                #[inline]
                fn hash_key(&self, value: &$t) -> u64 {
                    *value as u64
                }
            }
        )*
    };
}

impl_identity_hash!(u8, u16, u32, u64);
