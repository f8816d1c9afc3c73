//! 64-bit FNV-1a content hashing
//!
//! Every entry stores the FNV-1a digest of its uncompressed contents,
//! recomputed on verify. Deterministic and endian-independent.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Compute the 64-bit FNV-1a digest of a byte slice.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |state, &b| {
        (state ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_offset_basis() {
        assert_eq!(fnv1a(&[]), FNV_OFFSET_BASIS);
    }

    #[test]
    fn known_vectors() {
        // Reference digests for the standard FNV-1a test strings
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn order_sensitive() {
        assert_ne!(fnv1a(b"ab"), fnv1a(b"ba"));
    }
}
