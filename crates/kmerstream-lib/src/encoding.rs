//! DNA nucleotide encoding
//!
//! 2-bit codes, chosen so that complementing a base is a single XOR:
//! - A (65/97)  -> 00
//! - C (67/99)  -> 01
//! - G (71/103) -> 11
//! - T (84/116) -> 10

use thiserror::Error;

/// Error type for encoding operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// The input byte is not a valid DNA base (A/C/G/T)
    #[error("Invalid DNA base: {0:?}")]
    InvalidBase(u8),
    /// k does not fit in one 64-bit word
    #[error("k must be in range [{min}, {max}], got k={k}")]
    InvalidK {
        /// Requested k-mer length
        k: usize,
        /// Smallest supported length
        min: usize,
        /// Largest supported length
        max: usize,
    },
}

/// Encode a single DNA nucleotide to 2 bits
#[inline]
pub const fn encode_base(base: u8) -> Result<u8, EncodingError> {
    match base {
        b'A' | b'a' => Ok(0b00),
        b'C' | b'c' => Ok(0b01),
        b'G' | b'g' => Ok(0b11),
        b'T' | b't' => Ok(0b10),
        _ => Err(EncodingError::InvalidBase(base)),
    }
}

/// Decode a 2-bit value to DNA nucleotide (uppercase)
#[inline]
pub const fn decode_base(bits: u8) -> u8 {
    match bits & 0b11 {
        0b00 => b'A',
        0b01 => b'C',
        0b11 => b'G',
        _ => b'T',
    }
}

/// Get the complement of a DNA base (encoded)
#[inline]
pub const fn complement_base(bits: u8) -> u8 {
    // A(00) <-> T(10), C(01) <-> G(11)
    bits ^ 0b10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_base() {
        assert_eq!(encode_base(b'A').unwrap(), 0b00);
        assert_eq!(encode_base(b'c').unwrap(), 0b01);
        assert_eq!(encode_base(b'G').unwrap(), 0b11);
        assert_eq!(encode_base(b't').unwrap(), 0b10);

        assert_eq!(encode_base(b'N'), Err(EncodingError::InvalidBase(b'N')));
        assert!(encode_base(b'-').is_err());
    }

    #[test]
    fn test_complement_base() {
        for base in [b'A', b'C', b'G', b'T'] {
            let bits = encode_base(base).unwrap();
            let comp = decode_base(complement_base(bits));
            let expected = match base {
                b'A' => b'T',
                b'C' => b'G',
                b'G' => b'C',
                _ => b'A',
            };
            assert_eq!(comp, expected);
        }
    }
}
