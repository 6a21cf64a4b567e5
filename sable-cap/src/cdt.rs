//! Capability Derivation Tree (CDT)
//!
//! The CDT is kept as one doubly linked list threaded through the slots
//! themselves. A capability's descendants follow it directly in list
//! order, so the children of slot `a` are exactly the run of slots after
//! `a` for which [`CdtOps::is_mdb_parent_of`] holds.
//!
//! # Derivation Rules
//!
//! - **Retype**: new object caps are inserted right after the untyped,
//!   revocable and first-badged
//! - **Copy / Mint**: the new slot is linked right after its source;
//!   it is revocable only if it starts a new badge class
//! - **Move**: the slot's links are transplanted unchanged
//! - **Delete**: the slot is unlinked; a first-badged flag passes to the
//!   next slot so the badge class keeps its head
//! - **Revoke**: repeatedly deletes the next slot while it is a child

use sable_common::addr::mask;
use sable_common::PhysAddr;

use crate::{Cap, CapError, CapResult, Cte, MdbNode, ObjectRef, SlotRef};

/// Storage that hands out capability slots by reference.
///
/// Slot references are produced only by the kernel, so implementations
/// may treat an out-of-range reference as a broken invariant and panic.
pub trait SlotStore {
    /// Borrow a slot.
    fn cte(&self, at: SlotRef) -> &Cte;

    /// Mutably borrow a slot.
    fn cte_mut(&mut self, at: SlotRef) -> &mut Cte;
}

/// Physical memory covered by an object or capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemRegion {
    /// First byte.
    pub base: PhysAddr,
    /// Region is `2^size_bits` bytes.
    pub size_bits: u8,
}

impl MemRegion {
    /// Last byte of the region (inclusive).
    #[inline]
    #[must_use]
    pub const fn top(&self) -> u64 {
        self.base.0 + mask(self.size_bits as u32)
    }

    /// Whether `other` lies entirely inside this region.
    #[inline]
    #[must_use]
    pub const fn encloses(&self, other: &MemRegion) -> bool {
        self.base.0 <= other.base.0 && other.top() <= self.top() && other.base.0 <= other.top()
    }
}

/// Derivation-tree operations over a [`SlotStore`].
///
/// Implementors supply [`object_region`](CdtOps::object_region) so that
/// untyped capabilities can recognise objects carved from their memory.
pub trait CdtOps: SlotStore {
    /// Physical memory occupied by a kernel object.
    fn object_region(&self, object: ObjectRef) -> Option<MemRegion>;

    /// Physical memory covered by a capability, if it covers any.
    fn cap_region(&self, cap: &Cap) -> Option<MemRegion> {
        if let Some((base, size_bits)) = cap.memory_range() {
            return Some(MemRegion { base, size_bits });
        }
        match *cap {
            Cap::Endpoint { object, .. }
            | Cap::Notification { object, .. }
            | Cap::CNode { object, .. }
            | Cap::Zombie { object, .. } => self.object_region(object),
            Cap::Thread { tcb } => self.object_region(tcb),
            _ => None,
        }
    }

    /// Whether `b` names the same object as `a`, or (for untyped `a`)
    /// something inside `a`'s memory.
    fn same_region_as(&self, a: &Cap, b: &Cap) -> bool {
        match *a {
            Cap::Untyped {
                base, size_bits, ..
            } => {
                let region = MemRegion { base, size_bits };
                self.cap_region(b).is_some_and(|r| region.encloses(&r))
            }
            Cap::Endpoint { object, .. } => {
                matches!(*b, Cap::Endpoint { object: other, .. } if other == object)
            }
            Cap::Notification { object, .. } => {
                matches!(*b, Cap::Notification { object: other, .. } if other == object)
            }
            Cap::CNode { object, radix, .. } => matches!(
                *b,
                Cap::CNode { object: other, radix: other_radix, .. }
                    if other == object && other_radix == radix
            ),
            Cap::Thread { tcb } => matches!(*b, Cap::Thread { tcb: other } if other == tcb),
            Cap::Reply { tcb, .. } => matches!(*b, Cap::Reply { tcb: other, .. } if other == tcb),
            Cap::Domain => matches!(*b, Cap::Domain),
            Cap::IrqControl => matches!(*b, Cap::IrqControl | Cap::IrqHandler { .. }),
            Cap::IrqHandler { irq } => {
                matches!(*b, Cap::IrqHandler { irq: other } if other == irq)
            }
            Cap::Frame {
                base, size_bits, ..
            } => match *b {
                Cap::Frame {
                    base: other_base,
                    size_bits: other_bits,
                    ..
                } => MemRegion { base, size_bits }.encloses(&MemRegion {
                    base: other_base,
                    size_bits: other_bits,
                }),
                _ => false,
            },
            Cap::PageTable { base, .. } => {
                matches!(*b, Cap::PageTable { base: other, .. } if other == base)
            }
            Cap::Null | Cap::Zombie { .. } => false,
        }
    }

    /// Whether `a` and `b` name the very same object.
    fn same_object_as(&self, a: &Cap, b: &Cap) -> bool {
        match (*a, *b) {
            (Cap::Untyped { .. }, _) => false,
            (Cap::IrqControl, Cap::IrqHandler { .. }) => false,
            (
                Cap::Frame {
                    base,
                    size_bits,
                    is_device,
                    ..
                },
                Cap::Frame {
                    base: other_base,
                    size_bits: other_bits,
                    is_device: other_device,
                    ..
                },
            ) => base == other_base && size_bits == other_bits && is_device == other_device,
            _ => self.same_region_as(a, b),
        }
    }

    /// The revocation authority test: may slot `a` revoke slot `b`?
    fn is_mdb_parent_of(&self, a: SlotRef, b: SlotRef) -> bool {
        let a = self.cte(a);
        let b = self.cte(b);
        if !a.mdb.revocable || !self.same_region_as(&a.cap, &b.cap) {
            return false;
        }
        match a.cap {
            Cap::Endpoint { badge, .. } | Cap::Notification { badge, .. } => {
                badge.is_none() || (badge == b.cap.badge() && !b.mdb.first_badged)
            }
            _ => true,
        }
    }

    /// Whether `slot` holds the last capability to its object.
    fn is_final_capability(&self, slot: SlotRef) -> bool {
        let cte = self.cte(slot);
        if let Some(prev) = cte.mdb.prev {
            if self.same_object_as(&self.cte(prev).cap, &cte.cap) {
                return false;
            }
        }
        match cte.mdb.next {
            Some(next) => !self.same_object_as(&cte.cap, &self.cte(next).cap),
            None => true,
        }
    }

    /// Fails with [`CapError::RevokeFirst`] if `slot` has children.
    fn ensure_no_children(&self, slot: SlotRef) -> CapResult<()> {
        match self.cte(slot).mdb.next {
            Some(next) if self.is_mdb_parent_of(slot, next) => Err(CapError::RevokeFirst),
            _ => Ok(()),
        }
    }

    /// Fails with [`CapError::DeleteFirst`] if `slot` is occupied.
    fn ensure_empty_slot(&self, slot: SlotRef) -> CapResult<()> {
        if self.cte(slot).is_empty() {
            Ok(())
        } else {
            Err(CapError::DeleteFirst)
        }
    }

    /// Stop a copied untyped's source from being retyped while the copy
    /// exists, by marking the source full.
    fn set_untyped_cap_as_full(&mut self, src_cap: Cap, new_cap: Cap, src: SlotRef) {
        if let (
            Cap::Untyped {
                base, size_bits, ..
            },
            Cap::Untyped {
                base: new_base,
                size_bits: new_bits,
                ..
            },
        ) = (src_cap, new_cap)
        {
            if base == new_base && size_bits == new_bits {
                if let Cap::Untyped { free_offset, .. } = &mut self.cte_mut(src).cap {
                    *free_offset = 1u64 << size_bits;
                }
            }
        }
    }

    /// Insert `new_cap`, derived from the capability in `src`, into the
    /// empty slot `dest`, linking it directly after `src`.
    fn cte_insert(&mut self, new_cap: Cap, src: SlotRef, dest: SlotRef) {
        let src_cte = *self.cte(src);
        debug_assert!(self.cte(dest).is_empty(), "cte_insert into occupied slot {dest}");

        let revocable = new_cap.is_revocable_from(&src_cte.cap);
        self.set_untyped_cap_as_full(src_cte.cap, new_cap, src);

        let next = src_cte.mdb.next;
        *self.cte_mut(dest) = Cte {
            cap: new_cap,
            mdb: MdbNode {
                prev: Some(src),
                next,
                revocable,
                first_badged: revocable,
            },
        };
        self.cte_mut(src).mdb.next = Some(dest);
        if let Some(next) = next {
            self.cte_mut(next).mdb.prev = Some(dest);
        }
        log::debug!("cdt: insert {} at {} after {}", new_cap, dest, src);
    }

    /// Insert a freshly created object capability as a child of `parent`.
    fn insert_new_cap(&mut self, parent: SlotRef, slot: SlotRef, cap: Cap) {
        let next = self.cte(parent).mdb.next;
        *self.cte_mut(slot) = Cte {
            cap,
            mdb: MdbNode {
                prev: Some(parent),
                next,
                revocable: true,
                first_badged: true,
            },
        };
        if let Some(next) = next {
            self.cte_mut(next).mdb.prev = Some(slot);
        }
        self.cte_mut(parent).mdb.next = Some(slot);
    }

    /// Move the capability in `src` to the empty slot `dest`, replacing it
    /// with `new_cap` and keeping its position in the tree.
    fn cte_move(&mut self, new_cap: Cap, src: SlotRef, dest: SlotRef) {
        debug_assert!(self.cte(dest).is_empty(), "cte_move into occupied slot {dest}");
        let mdb = self.cte(src).mdb;
        *self.cte_mut(dest) = Cte { cap: new_cap, mdb };
        *self.cte_mut(src) = Cte::EMPTY;

        if let Some(prev) = mdb.prev {
            self.cte_mut(prev).mdb.next = Some(dest);
        }
        if let Some(next) = mdb.next {
            self.cte_mut(next).mdb.prev = Some(dest);
        }
        log::debug!("cdt: move {} from {} to {}", new_cap, src, dest);
    }

    /// Exchange the positions of two slots, storing `cap1` (from `slot1`)
    /// in `slot2` and `cap2` in `slot1`.
    fn cte_swap(&mut self, cap1: Cap, slot1: SlotRef, cap2: Cap, slot2: SlotRef) {
        self.cte_mut(slot1).cap = cap2;
        self.cte_mut(slot2).cap = cap1;

        let mdb1 = self.cte(slot1).mdb;
        if let Some(prev) = mdb1.prev {
            self.cte_mut(prev).mdb.next = Some(slot2);
        }
        if let Some(next) = mdb1.next {
            self.cte_mut(next).mdb.prev = Some(slot2);
        }

        // Read after the first relink: adjacent slots see their own update.
        let mdb2 = self.cte(slot2).mdb;
        self.cte_mut(slot1).mdb = mdb2;
        self.cte_mut(slot2).mdb = mdb1;

        if let Some(prev) = mdb2.prev {
            self.cte_mut(prev).mdb.next = Some(slot1);
        }
        if let Some(next) = mdb2.next {
            self.cte_mut(next).mdb.prev = Some(slot1);
        }
    }

    /// Unlink `slot` from the tree and clear it.
    fn cte_unlink(&mut self, slot: SlotRef) {
        let mdb = self.cte(slot).mdb;
        if let Some(prev) = mdb.prev {
            self.cte_mut(prev).mdb.next = mdb.next;
        }
        if let Some(next) = mdb.next {
            let next_mdb = &mut self.cte_mut(next).mdb;
            next_mdb.prev = mdb.prev;
            next_mdb.first_badged |= mdb.first_badged;
        }
        *self.cte_mut(slot) = Cte::EMPTY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Badge, CapRights};
    use proptest::prelude::*;

    /// One flat CNode (object 1); every other object is 16 bytes at
    /// `index * 0x100`.
    struct Flat {
        slots: Vec<Cte>,
    }

    impl Flat {
        fn new(n: usize) -> Self {
            Self {
                slots: vec![Cte::EMPTY; n],
            }
        }

        fn place(&mut self, index: u32, cap: Cap, revocable: bool) {
            let cte = &mut self.slots[index as usize];
            cte.cap = cap;
            cte.mdb.revocable = revocable;
            cte.mdb.first_badged = revocable;
        }

        /// Slots reachable by walking `next` from `start`.
        fn chain(&self, start: u32) -> Vec<u32> {
            let mut out = vec![start];
            let mut cur = self.cte(s(start)).mdb.next;
            while let Some(slot) = cur {
                out.push(slot.index);
                cur = self.cte(slot).mdb.next;
            }
            out
        }

        fn assert_links_consistent(&self) {
            for (i, cte) in self.slots.iter().enumerate() {
                if let Some(next) = cte.mdb.next {
                    assert_eq!(self.cte(next).mdb.prev, Some(s(i as u32)));
                }
                if let Some(prev) = cte.mdb.prev {
                    assert_eq!(self.cte(prev).mdb.next, Some(s(i as u32)));
                }
            }
        }
    }

    impl SlotStore for Flat {
        fn cte(&self, at: SlotRef) -> &Cte {
            &self.slots[at.index as usize]
        }

        fn cte_mut(&mut self, at: SlotRef) -> &mut Cte {
            &mut self.slots[at.index as usize]
        }
    }

    impl CdtOps for Flat {
        fn object_region(&self, object: ObjectRef) -> Option<MemRegion> {
            Some(MemRegion {
                base: PhysAddr(u64::from(object.index()) * 0x100),
                size_bits: 4,
            })
        }
    }

    fn s(index: u32) -> SlotRef {
        SlotRef::new(ObjectRef::from_index(1), index)
    }

    fn ep(badge: u64) -> Cap {
        Cap::Endpoint {
            object: ObjectRef::from_index(9),
            badge: Badge::new(badge),
            rights: CapRights::ALL,
        }
    }

    #[test]
    fn test_insert_links_after_source() {
        let mut t = Flat::new(8);
        t.place(0, ep(0), true);
        t.cte_insert(ep(0), s(0), s(1));
        t.cte_insert(ep(0), s(0), s(2));
        assert_eq!(t.chain(0), vec![0, 2, 1]);
        t.assert_links_consistent();
    }

    #[test]
    fn test_badged_copy_has_no_authority_over_siblings() {
        let mut t = Flat::new(8);
        t.place(0, ep(0), true);
        // Mint badge 7: starts a new badge class.
        t.cte_insert(ep(7), s(0), s(1));
        assert!(t.cte(s(1)).mdb.revocable);
        assert!(t.cte(s(1)).mdb.first_badged);
        // Two badge-preserving copies of the minted cap.
        t.cte_insert(ep(7), s(1), s(2));
        t.cte_insert(ep(7), s(2), s(3));
        assert!(!t.cte(s(2)).mdb.revocable);

        assert!(t.is_mdb_parent_of(s(0), s(1)));
        assert!(t.is_mdb_parent_of(s(1), s(2)));
        assert!(!t.is_mdb_parent_of(s(2), s(3)));
        assert!(t.ensure_no_children(s(2)).is_ok());
        assert_eq!(t.ensure_no_children(s(1)), Err(CapError::RevokeFirst));
    }

    #[test]
    fn test_first_badged_separates_classes() {
        let mut t = Flat::new(8);
        t.place(0, ep(0), true);
        t.cte_insert(ep(7), s(0), s(1));
        // A second, independent mint with the same badge value.
        t.cte_insert(ep(7), s(0), s(2));
        assert_eq!(t.chain(0), vec![0, 2, 1]);
        assert!(!t.is_mdb_parent_of(s(2), s(1)));
    }

    #[test]
    fn test_unlink_passes_first_badged() {
        let mut t = Flat::new(8);
        t.place(0, ep(0), true);
        t.cte_insert(ep(7), s(0), s(1));
        t.cte_insert(ep(7), s(1), s(2));
        t.cte_unlink(s(1));
        assert!(t.cte(s(1)).is_empty());
        assert!(t.cte(s(2)).mdb.first_badged);
        assert_eq!(t.chain(0), vec![0, 2]);
        t.assert_links_consistent();
    }

    #[test]
    fn test_move_keeps_position() {
        let mut t = Flat::new(8);
        t.place(0, ep(0), true);
        t.cte_insert(ep(0), s(0), s(1));
        t.cte_insert(ep(0), s(1), s(2));
        t.cte_move(ep(0), s(1), s(5));
        assert!(t.cte(s(1)).is_empty());
        assert_eq!(t.chain(0), vec![0, 5, 2]);
        t.assert_links_consistent();
    }

    #[test]
    fn test_swap_adjacent_slots() {
        let mut t = Flat::new(8);
        t.place(0, ep(0), true);
        t.cte_insert(ep(1), s(0), s(1));
        t.cte_insert(ep(2), s(1), s(2));
        let (a, b) = (t.cte(s(1)).cap, t.cte(s(2)).cap);
        t.cte_swap(a, s(1), b, s(2));
        assert_eq!(t.chain(0), vec![0, 2, 1]);
        assert_eq!(t.cte(s(2)).cap, ep(1));
        assert_eq!(t.cte(s(1)).cap, ep(2));
        t.assert_links_consistent();
    }

    #[test]
    fn test_final_capability() {
        let mut t = Flat::new(8);
        t.place(0, ep(0), true);
        assert!(t.is_final_capability(s(0)));
        t.cte_insert(ep(0), s(0), s(1));
        assert!(!t.is_final_capability(s(0)));
        assert!(!t.is_final_capability(s(1)));
    }

    #[test]
    fn test_untyped_encloses_objects() {
        let t = Flat::new(1);
        let ut = Cap::Untyped {
            base: PhysAddr(0),
            size_bits: 12,
            free_offset: 0,
            is_device: false,
        };
        assert!(t.same_region_as(&ut, &ep(0)));
        let far = Cap::Thread {
            tcb: ObjectRef::from_index(0x40),
        };
        assert!(!t.same_region_as(&ut, &far));
        assert!(!t.same_object_as(&ut, &ep(0)));
    }

    #[test]
    fn test_untyped_copy_marks_source_full() {
        let mut t = Flat::new(4);
        let ut = Cap::Untyped {
            base: PhysAddr(0x10000),
            size_bits: 12,
            free_offset: 0,
            is_device: false,
        };
        t.place(0, ut, true);
        t.cte_insert(ut, s(0), s(1));
        assert_eq!(t.cte(s(0)).cap.untyped_free_bytes(), 0);
        assert_eq!(t.cte(s(1)).cap.untyped_free_bytes(), 4096);
    }

    proptest! {
        #[test]
        fn derivation_list_stays_consistent(ops in proptest::collection::vec((0u32..16, 0u32..16, any::<bool>()), 1..64)) {
            let mut t = Flat::new(16);
            t.place(0, ep(0), true);
            for (src, dest, unlink) in ops {
                if unlink {
                    if dest != 0 && !t.cte(s(dest)).is_empty() {
                        t.cte_unlink(s(dest));
                    }
                } else if !t.cte(s(src)).is_empty() && t.cte(s(dest)).is_empty() {
                    let cap = t.cte(s(src)).cap;
                    t.cte_insert(cap, s(src), s(dest));
                }
                t.assert_links_consistent();
            }
            let occupied = t.slots.iter().filter(|c| !c.is_empty()).count();
            prop_assert_eq!(t.chain(0).len(), occupied);
        }
    }
}
