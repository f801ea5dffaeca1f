//! Constants shared by the ingestion pipeline and the output engine
//!
//! Sizes are in bytes unless the name says otherwise.

/// Bytes per GiB
pub const GIB: usize = 1024 * 1024 * 1024;

/// Largest single write issued to the OS in one call (1 GiB)
pub const DEFAULT_CHUNK_BYTES: usize = GIB;

/// Default device block size for direct I/O
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Memory held back from planning across the whole run (8 GiB), split among ranks
pub const DEFAULT_GLOBAL_RESERVE_BYTES: u64 = 1 << 33;

/// Default seed for hash functions
pub const DEFAULT_SEED: u64 = 1;

/// Default register estimator precision (2^12 registers)
pub const DEFAULT_HLL_PRECISION: u8 = 12;

/// Multiplier on the staging buffer footprint when estimating memory use
pub const STAGING_FACTOR: u64 = 3;

/// Multiplier on raw file bytes when estimating memory use (I/O buffering)
pub const IO_FACTOR: u64 = 2;

/// Maximum k-mer length that fits a single 64-bit word
pub const MAX_K: usize = 32;

/// Minimum k-mer length
pub const MIN_K: usize = 1;

/// Version number
pub const VERSION: (u8, u8, u8) = (0, 1, 0);

/// Round `x` up to the next multiple of `align` (`align` > 0)
#[inline]
pub const fn round_up(x: usize, align: usize) -> usize {
    x.div_ceil(align) * align
}

/// Round `x` down to a multiple of `align`, which must be a power of two
#[inline]
pub const fn round_down_pow2(x: u64, align: u64) -> u64 {
    x & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 512), 0);
        assert_eq!(round_up(1, 512), 512);
        assert_eq!(round_up(512, 512), 512);
        assert_eq!(round_up(513, 512), 1024);
    }

    #[test]
    fn test_round_down_pow2() {
        assert_eq!(round_down_pow2(0, 4096), 0);
        assert_eq!(round_down_pow2(4095, 4096), 0);
        assert_eq!(round_down_pow2(4096, 4096), 4096);
        assert_eq!(round_down_pow2(10_000, 4096), 8192);
    }

    #[test]
    fn test_reserve_is_eight_gib() {
        assert_eq!(DEFAULT_GLOBAL_RESERVE_BYTES, 8 * GIB as u64);
    }
}
