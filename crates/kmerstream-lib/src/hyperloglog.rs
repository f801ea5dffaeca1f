//! 64-bit HyperLogLog register estimator
//!
//! Sized for estimating how many entries a hash table will hold, so two
//! simplifications apply relative to HyperLogLog++:
//!
//! 1. hashes are 64 bits wide, so the large-range correction is never applied;
//! 2. no empirical bias correction; below `2.5 * m` the estimate switches to
//!    linear counting whenever a register is still zero.
//!
//! Overestimating a small cardinality only costs a slightly larger table, and
//! the table's load factor absorbs the rest. The accuracy target of 2% is not
//! met in the small-to-mid range; see the tests for the observed behavior.
//!
//! References: Heule, Nunkesser, Hall, "HyperLogLog in Practice" (2013);
//! Flajolet, Martin, "Probabilistic counting algorithms" (1985).

use std::fmt;
use std::marker::PhantomData;

use crate::error::ConfigError;
use crate::hasher::{DeterministicHasher, KeyHash};

/// Smallest supported precision
pub const MIN_PRECISION: u8 = 4;
/// Largest supported precision
pub const MAX_PRECISION: u8 = 16;

/// Position of the leftmost set bit, 1-indexed from the MSB; 65 for zero
#[inline]
pub fn leftmost_set_bit(x: u64) -> u8 {
    // leading_zeros(0) == 64, so zero maps to 65 without a branch
    x.leading_zeros() as u8 + 1
}

/// Approximate distinct counter over values of type `T`
///
/// Registers only ever increase, except through [`clear`](Self::clear).
pub struct HyperLogLog64<T: ?Sized, H = DeterministicHasher> {
    precision: u8,
    registers: Vec<u8>,
    amm: f64,
    hasher: H,
    _marker: PhantomData<fn(&T)>,
}

impl<T: ?Sized, H: KeyHash<T> + Default> HyperLogLog64<T, H> {
    /// Create an empty estimator with `2^precision` registers
    pub fn new(precision: u8) -> Result<Self, ConfigError> {
        Self::with_hasher(precision, H::default())
    }
}

impl<T: ?Sized, H: KeyHash<T>> HyperLogLog64<T, H> {
    /// Create an empty estimator using the given hash function
    pub fn with_hasher(precision: u8, hasher: H) -> Result<Self, ConfigError> {
        let max = Self::max_precision();
        if !(MIN_PRECISION..=max).contains(&precision) {
            return Err(ConfigError::InvalidPrecision { precision, max });
        }

        let num_registers = 1usize << precision;
        let alpha = match precision {
            4 => 0.673,
            5 => 0.697,
            6 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / num_registers as f64),
        };

        Ok(Self {
            precision,
            registers: vec![0; num_registers],
            amm: alpha * (num_registers as f64) * (num_registers as f64),
            hasher,
            _marker: PhantomData,
        })
    }

    /// Largest precision accepted for this hash function
    ///
    /// Pass-through hashes must leave at least one bit for the rank field.
    pub fn max_precision() -> u8 {
        if H::PASS_THROUGH {
            MAX_PRECISION.min(H::DATA_BITS.saturating_sub(1))
        } else {
            MAX_PRECISION
        }
    }

    /// Fold one value into the registers
    #[inline]
    pub fn update(&mut self, value: &T) {
        let hash = self.hasher.hash_key(value);
        self.update_via_hash(hash);
    }

    /// Fold a precomputed hash into the registers
    #[inline]
    pub fn update_via_hash(&mut self, hash: u64) {
        let (idx, rank) = if H::PASS_THROUGH {
            self.split_pass_through(hash)
        } else {
            self.split_diffused(hash)
        };
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    /// High `precision` bits select the register; rank comes from the rest
    #[inline]
    fn split_diffused(&self, hash: u64) -> (usize, u8) {
        let p = self.precision;
        let idx = (hash >> (64 - p)) as usize;
        let val_mask = u64::MAX >> p;
        (idx, leftmost_set_bit(hash & val_mask) - p)
    }

    /// Low `precision` bits select the register; rank comes from the bits above
    #[inline]
    fn split_pass_through(&self, hash: u64) -> (usize, u8) {
        let p = self.precision;
        let value_bits = H::DATA_BITS.min(64) - p;
        let idx = (hash & ((1u64 << p) - 1)) as usize;
        let field = (hash >> p) & (u64::MAX >> (64 - value_bits));
        // leading zeros within the value field; zero yields value_bits + 1
        let rank = leftmost_set_bit(field) - (64 - value_bits);
        (idx, rank)
    }

    /// Approximate number of distinct values seen
    pub fn estimate(&self) -> f64 {
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-i32::from(r)))
            .sum();
        let estimate = self.amm / sum;

        let m = self.registers.len() as f64;
        if estimate <= 2.5 * m {
            let zeros = self.count_zeros();
            if zeros > 0 {
                return self.linear_count(zeros);
            }
        }
        estimate
    }

    /// Number of registers still at zero
    pub fn count_zeros(&self) -> u64 {
        self.registers.iter().filter(|&&r| r == 0).count() as u64
    }

    /// Linear counting estimate given the number of zero registers (> 0)
    pub fn linear_count(&self, zeros: u64) -> f64 {
        let m = self.registers.len() as f64;
        m * (m / zeros as f64).ln()
    }

    /// Element-wise maximum with another estimator of the same precision
    pub fn merge(&mut self, other: &Self) -> Result<(), ConfigError> {
        self.merge_registers(&other.registers)
    }

    /// Element-wise maximum with a raw register array (e.g. from another rank)
    pub fn merge_registers(&mut self, other: &[u8]) -> Result<(), ConfigError> {
        if other.len() != self.registers.len() {
            return Err(ConfigError::Invalid(format!(
                "cannot merge hyperloglog with {} registers into one with {}",
                other.len(),
                self.registers.len()
            )));
        }
        for (mine, &theirs) in self.registers.iter_mut().zip(other) {
            *mine = (*mine).max(theirs);
        }
        Ok(())
    }

    /// Reset every register to zero
    pub fn clear(&mut self) {
        self.registers.fill(0);
    }

    /// Register array
    pub fn registers(&self) -> &[u8] {
        &self.registers
    }

    /// Precision (log2 of the register count)
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Number of registers
    pub fn num_registers(&self) -> usize {
        self.registers.len()
    }
}

impl<T: ?Sized, H: Clone> Clone for HyperLogLog64<T, H> {
    fn clone(&self) -> Self {
        Self {
            precision: self.precision,
            registers: self.registers.clone(),
            amm: self.amm,
            hasher: self.hasher.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized, H> fmt::Debug for HyperLogLog64<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperLogLog64")
            .field("precision", &self.precision)
            .field("num_registers", &self.registers.len())
            .finish()
    }
}
