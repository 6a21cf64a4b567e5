//! CNode addressing
//!
//! A CPtr is a word interpreted from its most significant end. Each CNode
//! on the path consumes `guard_size` bits that must equal its guard, then
//! `radix` bits selecting a slot. If bits remain and the selected slot
//! holds another CNode capability, resolution continues there.
//!
//! ```text
//! | guard | index | guard | index | ... |
//!   level 1         level 2
//! ```

use crate::cdt::SlotStore;
use crate::{Cap, LookupFault, SlotRef};

/// Bits in a CPtr.
pub const WORD_BITS: u32 = 64;

/// Guard data written into a CNode capability by Mint or Mutate.
///
/// Layout: bits 0..6 hold the guard size, bits 6.. hold the guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CNodeCapData {
    /// Guard size in bits.
    pub guard_size: u8,
    /// Guard value (only the low `guard_size` bits are meaningful).
    pub guard: u64,
}

impl CNodeCapData {
    const GUARD_SIZE_BITS: u32 = 6;

    /// Decode from a message word.
    #[inline]
    #[must_use]
    pub const fn from_word(word: u64) -> Self {
        Self {
            guard_size: (word & ((1 << Self::GUARD_SIZE_BITS) - 1)) as u8,
            guard: word >> Self::GUARD_SIZE_BITS,
        }
    }

    /// Encode into a message word.
    #[inline]
    #[must_use]
    pub const fn to_word(self) -> u64 {
        (self.guard << Self::GUARD_SIZE_BITS) | self.guard_size as u64
    }

    /// Guard truncated to its size.
    #[inline]
    #[must_use]
    pub const fn masked_guard(self) -> u64 {
        self.guard & sable_common::addr::mask(self.guard_size as u32)
    }
}

/// Outcome of a successful resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolved {
    /// The slot reached.
    pub slot: SlotRef,
    /// CPtr bits left unconsumed when a non-CNode capability stopped the
    /// walk early.
    pub bits_remaining: u32,
}

#[inline]
const fn shr(value: u64, shift: u32) -> u64 {
    if shift >= WORD_BITS {
        0
    } else {
        value >> shift
    }
}

/// Resolve `n_bits` of `cptr` starting at `node_cap`.
///
/// Fails with [`LookupFault::InvalidRoot`] when `node_cap` is not a CNode,
/// and with a guard or depth mismatch when the CPtr does not fit the
/// CSpace shape.
pub fn resolve_address_bits<S>(
    store: &S,
    node_cap: Cap,
    cptr: u64,
    n_bits: u32,
) -> Result<Resolved, LookupFault>
where
    S: SlotStore + ?Sized,
{
    let Cap::CNode {
        mut object,
        mut radix,
        mut guard_size,
        mut guard,
    } = node_cap
    else {
        return Err(LookupFault::InvalidRoot);
    };

    let mut n_bits = n_bits;
    loop {
        let radix_bits = u32::from(radix);
        let guard_bits = u32::from(guard_size);
        let level_bits = radix_bits + guard_bits;

        if guard_bits > n_bits
            || shr(cptr, n_bits - guard_bits) & sable_common::addr::mask(guard_bits) != guard
        {
            return Err(LookupFault::GuardMismatch {
                bits_left: n_bits,
                guard_found: guard,
                guard_size: guard_bits,
            });
        }

        if level_bits > n_bits || level_bits == 0 {
            return Err(LookupFault::DepthMismatch {
                bits_found: level_bits,
                bits_left: n_bits,
            });
        }

        let offset = shr(cptr, n_bits - level_bits) & sable_common::addr::mask(radix_bits);
        let slot = SlotRef::new(object, offset as u32);

        if n_bits == level_bits {
            return Ok(Resolved {
                slot,
                bits_remaining: 0,
            });
        }

        n_bits -= level_bits;
        match store.cte(slot).cap {
            Cap::CNode {
                object: next,
                radix: next_radix,
                guard_size: next_guard_size,
                guard: next_guard,
            } => {
                object = next;
                radix = next_radix;
                guard_size = next_guard_size;
                guard = next_guard;
            }
            _ => {
                return Ok(Resolved {
                    slot,
                    bits_remaining: n_bits,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdt::SlotStore;
    use crate::{Cte, ObjectRef};

    /// Two CNodes: object 1 with radix 4, object 2 with radix 8.
    struct TwoLevel {
        top: [Cte; 16],
        leaf: Vec<Cte>,
    }

    impl SlotStore for TwoLevel {
        fn cte(&self, at: SlotRef) -> &Cte {
            match at.object.index() {
                1 => &self.top[at.index as usize],
                _ => &self.leaf[at.index as usize],
            }
        }

        fn cte_mut(&mut self, at: SlotRef) -> &mut Cte {
            match at.object.index() {
                1 => &mut self.top[at.index as usize],
                _ => &mut self.leaf[at.index as usize],
            }
        }
    }

    fn cnode(index: u32, radix: u8, guard_size: u8, guard: u64) -> Cap {
        Cap::CNode {
            object: ObjectRef::from_index(index),
            radix,
            guard_size,
            guard,
        }
    }

    fn store() -> TwoLevel {
        let mut top = [Cte::EMPTY; 16];
        // Slot 3 of the top node links to the leaf, whose guard soaks up
        // the remaining high bits.
        top[3].cap = cnode(2, 8, 52, 0);
        TwoLevel {
            top,
            leaf: vec![Cte::EMPTY; 256],
        }
    }

    #[test]
    fn test_single_level_lookup() {
        let s = store();
        let root = cnode(1, 4, 60, 0);
        let r = resolve_address_bits(&s, root, 0x5, 64).unwrap();
        assert_eq!(r.slot, SlotRef::new(ObjectRef::from_index(1), 5));
        assert_eq!(r.bits_remaining, 0);
    }

    #[test]
    fn test_two_level_lookup() {
        let s = store();
        let root = cnode(1, 4, 0, 0);
        // Top 4 bits select slot 3, the leaf guard eats 52 zero bits, and the
        // low 8 bits select leaf slot 0x42.
        let cptr = (3u64 << 60) | 0x42;
        let r = resolve_address_bits(&s, root, cptr, 64).unwrap();
        assert_eq!(r.slot, SlotRef::new(ObjectRef::from_index(2), 0x42));
    }

    #[test]
    fn test_stops_at_non_cnode() {
        let s = store();
        let root = cnode(1, 4, 0, 0);
        let r = resolve_address_bits(&s, root, 7u64 << 60, 64).unwrap();
        assert_eq!(r.slot, SlotRef::new(ObjectRef::from_index(1), 7));
        assert_eq!(r.bits_remaining, 60);
    }

    #[test]
    fn test_guard_mismatch() {
        let s = store();
        let root = cnode(1, 4, 60, 0);
        let err = resolve_address_bits(&s, root, 1u64 << 63, 64).unwrap_err();
        assert_eq!(
            err,
            LookupFault::GuardMismatch {
                bits_left: 64,
                guard_found: 0,
                guard_size: 60
            }
        );
    }

    #[test]
    fn test_depth_mismatch() {
        let s = store();
        let root = cnode(1, 4, 0, 0);
        let err = resolve_address_bits(&s, root, 0, 2).unwrap_err();
        assert_eq!(
            err,
            LookupFault::DepthMismatch {
                bits_found: 4,
                bits_left: 2
            }
        );
    }

    #[test]
    fn test_invalid_root() {
        let s = store();
        let err = resolve_address_bits(&s, Cap::Domain, 0, 64).unwrap_err();
        assert_eq!(err, LookupFault::InvalidRoot);
    }

    #[test]
    fn test_cap_data_roundtrip() {
        let data = CNodeCapData {
            guard_size: 12,
            guard: 0xABC,
        };
        assert_eq!(CNodeCapData::from_word(data.to_word()), data);
        assert_eq!(CNodeCapData::from_word(5 << 6 | 1).masked_guard(), 1);
    }
}
