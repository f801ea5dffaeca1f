//! K-mers packed into a single `u64`
//!
//! The first base of the window sits in the most significant used bits, so
//! numeric order of packed k-mers is lexicographic order under the 2-bit code.
//! Windows containing a non-ACGT byte are skipped, and extraction resumes once
//! `k` valid bases have been seen again.

use crate::constants::{MAX_K, MIN_K};
use crate::encoding::{complement_base, encode_base, EncodingError};

/// Shape of the k-mers extracted from input sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmerSpec {
    k: usize,
    canonical: bool,
    mask: u64,
}

impl KmerSpec {
    /// Create a spec for k-mers of length `k`
    pub fn new(k: usize, canonical: bool) -> Result<Self, EncodingError> {
        if !(MIN_K..=MAX_K).contains(&k) {
            return Err(EncodingError::InvalidK {
                k,
                min: MIN_K,
                max: MAX_K,
            });
        }
        let mask = if k == 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
        Ok(Self { k, canonical, mask })
    }

    /// K-mer length
    pub fn k(&self) -> usize {
        self.k
    }

    /// Whether k-mers are reported in canonical form
    pub fn canonical(&self) -> bool {
        self.canonical
    }

    /// Pack an ACGT string of exactly `k` bases
    pub fn pack(&self, bases: &[u8]) -> Result<u64, EncodingError> {
        if bases.len() != self.k {
            return Err(EncodingError::InvalidK {
                k: bases.len(),
                min: self.k,
                max: self.k,
            });
        }
        let mut bits = 0u64;
        for &base in bases {
            bits = (bits << 2) | encode_base(base)? as u64;
        }
        Ok(if self.canonical { self.canonicalize(bits) } else { bits })
    }

    /// Reverse complement of a packed k-mer
    #[inline]
    pub fn reverse_complement(&self, bits: u64) -> u64 {
        // XOR with 0xAAAA... (10 repeating) flips A<->T, C<->G
        let mut x = bits ^ 0xAAAA_AAAA_AAAA_AAAAu64;
        x = ((x >> 2) & 0x3333_3333_3333_3333u64) | ((x & 0x3333_3333_3333_3333u64) << 2);
        x = ((x >> 4) & 0x0F0F_0F0F_0F0F_0F0Fu64) | ((x & 0x0F0F_0F0F_0F0F_0F0Fu64) << 4);
        x = x.swap_bytes();
        x >> (64 - 2 * self.k)
    }

    /// The smaller of a k-mer and its reverse complement
    #[inline]
    pub fn canonicalize(&self, bits: u64) -> u64 {
        bits.min(self.reverse_complement(bits))
    }

    /// Iterate the k-mers of one sequence
    pub fn kmers<'a>(&self, seq: &'a [u8]) -> KmerIter<'a> {
        KmerIter {
            spec: *self,
            seq,
            pos: 0,
            fwd: 0,
            rev: 0,
            valid: 0,
        }
    }

    /// Unpack into an uppercase base string
    #[cfg(test)]
    pub fn unpack(&self, bits: u64) -> String {
        (0..self.k)
            .rev()
            .map(|i| crate::encoding::decode_base(((bits >> (2 * i)) & 0b11) as u8) as char)
            .collect()
    }
}

/// Rolling k-mer extraction over one sequence
pub struct KmerIter<'a> {
    spec: KmerSpec,
    seq: &'a [u8],
    pos: usize,
    fwd: u64,
    rev: u64,
    valid: usize,
}

impl Iterator for KmerIter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let k = self.spec.k;
        while self.pos < self.seq.len() {
            let base = self.seq[self.pos];
            self.pos += 1;
            let code = match encode_base(base) {
                Ok(code) => code as u64,
                Err(_) => {
                    self.valid = 0;
                    continue;
                }
            };
            self.fwd = ((self.fwd << 2) | code) & self.spec.mask;
            self.rev = (self.rev >> 2) | ((complement_base(code as u8) as u64) << (2 * (k - 1)));
            self.valid += 1;
            if self.valid >= k {
                return Some(if self.spec.canonical {
                    self.fwd.min(self.rev)
                } else {
                    self.fwd
                });
            }
        }
        None
    }
}

/// Number of k-mers a sequence of `len` bases yields at most
#[inline]
pub fn max_kmers(len: usize, k: usize) -> usize {
    (len + 1).saturating_sub(k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_validation() {
        assert!(KmerSpec::new(0, false).is_err());
        assert!(KmerSpec::new(33, false).is_err());
        assert!(KmerSpec::new(1, false).is_ok());
        assert!(KmerSpec::new(32, true).is_ok());
    }

    #[test]
    fn test_pack_unpack() {
        let spec = KmerSpec::new(5, false).unwrap();
        let bits = spec.pack(b"GATTA").unwrap();
        assert_eq!(spec.unpack(bits), "GATTA");
        assert!(spec.pack(b"GATT").is_err());
        assert!(spec.pack(b"GANTA").is_err());
    }

    #[test]
    fn test_reverse_complement() {
        let spec = KmerSpec::new(7, false).unwrap();
        let bits = spec.pack(b"ACGTTGA").unwrap();
        assert_eq!(spec.unpack(spec.reverse_complement(bits)), "TCAACGT");
        assert_eq!(spec.reverse_complement(spec.reverse_complement(bits)), bits);

        let full = KmerSpec::new(32, false).unwrap();
        let seq = b"ACGTACGTTTGGCCAAACGTACGTTTGGCCAA";
        let bits = full.pack(seq).unwrap();
        assert_eq!(full.reverse_complement(full.reverse_complement(bits)), bits);
    }

    #[test]
    fn test_iter_matches_pack() {
        let spec = KmerSpec::new(3, false).unwrap();
        let seq = b"ACGTAC";
        let kmers: Vec<u64> = spec.kmers(seq).collect();
        let expected: Vec<u64> = seq.windows(3).map(|w| spec.pack(w).unwrap()).collect();
        assert_eq!(kmers, expected);
        assert_eq!(kmers.len(), max_kmers(seq.len(), 3));
    }

    #[test]
    fn test_iter_skips_invalid_windows() {
        let spec = KmerSpec::new(3, false).unwrap();
        let kmers: Vec<String> = spec.kmers(b"ACGNTTAC").map(|b| spec.unpack(b)).collect();
        assert_eq!(kmers, vec!["ACG", "TTA", "TAC"]);
        assert_eq!(spec.kmers(b"AC").count(), 0);
    }

    #[test]
    fn test_canonical_iter() {
        let spec = KmerSpec::new(4, true).unwrap();
        let plain = KmerSpec::new(4, false).unwrap();
        let fwd: Vec<u64> = spec.kmers(b"ACGGTCA").collect();
        let mut rc: Vec<u64> = spec.kmers(b"TGACCGT").collect();
        rc.reverse();
        assert_eq!(fwd, rc);
        for (bits, window) in fwd.iter().zip(b"ACGGTCA".windows(4)) {
            let raw = plain.pack(window).unwrap();
            assert_eq!(*bits, raw.min(plain.reverse_complement(raw)));
        }
    }
}
