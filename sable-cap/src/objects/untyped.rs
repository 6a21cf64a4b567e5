//! Untyped free-space arithmetic
//!
//! An untyped capability carries a byte cursor marking the start of its
//! free space. Retype aligns the cursor up to the object size, places the
//! objects, and moves the cursor past them. The cursor only moves back
//! when the whole region is reset.

use sable_common::addr::mask;

/// Bytes left after `free_offset` in a region of `2^size_bits` bytes.
#[inline]
#[must_use]
pub const fn free_bytes(size_bits: u8, free_offset: u64) -> u64 {
    (1u64 << size_bits) - free_offset
}

/// `free_offset` rounded up to a multiple of `2^obj_bits`.
#[inline]
#[must_use]
pub const fn aligned_offset(free_offset: u64, obj_bits: u64) -> u64 {
    let m = mask(obj_bits as u32);
    (free_offset + m) & !m
}

/// Whether `count` objects of `2^obj_bits` bytes fit after `free_offset`.
///
/// Because the region size is itself a multiple of the object size, this
/// equals checking that the aligned placement ends inside the region.
#[inline]
#[must_use]
pub const fn fits(size_bits: u8, free_offset: u64, obj_bits: u64, count: u64) -> bool {
    if obj_bits > size_bits as u64 {
        return false;
    }
    (free_bytes(size_bits, free_offset) >> obj_bits) >= count
}

/// Cursor after placing `count` objects of `2^obj_bits` bytes.
#[inline]
#[must_use]
pub const fn advance(free_offset: u64, obj_bits: u64, count: u64) -> u64 {
    aligned_offset(free_offset, obj_bits) + (count << obj_bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_four_tcbs_from_64k() {
        assert!(fits(16, 0, 10, 4));
        assert_eq!(advance(0, 10, 4), 4096);
        assert_eq!(free_bytes(16, 4096), 61440);
        assert!(!fits(16, 4096, 10, 61));
        assert!(fits(16, 4096, 10, 60));
    }

    #[test]
    fn test_alignment() {
        assert_eq!(aligned_offset(0x10, 10), 0x400);
        assert_eq!(aligned_offset(0x400, 10), 0x400);
        assert_eq!(aligned_offset(0, 12), 0);
    }

    #[test]
    fn test_object_larger_than_region() {
        assert!(!fits(12, 0, 13, 0));
    }

    proptest! {
        #[test]
        fn cursor_is_monotonic_and_bounded(
            size_bits in 12u8..24,
            requests in proptest::collection::vec((4u64..14, 1u64..8), 1..32),
        ) {
            let mut cursor = 0u64;
            for (obj_bits, count) in requests {
                if !fits(size_bits, cursor, obj_bits, count) {
                    continue;
                }
                let next = advance(cursor, obj_bits, count);
                prop_assert!(next >= cursor);
                prop_assert!(next <= 1u64 << size_bits);
                cursor = next;
            }
        }
    }
}
