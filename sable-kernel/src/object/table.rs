//! Kernel object table
//!
//! The object table stores all kernel objects indexed by [`ObjectRef`].
//! It is owned by the kernel state and only touched under the kernel lock.
//!
//! # Design
//!
//! - Index 0 is reserved (NULL reference)
//! - Objects are stored in a flat array with a free list
//! - Each entry records the memory region it was carved from; resetting
//!   an untyped region releases every entry inside it
//! - Entries with a region are also indexed by base address, so region
//!   queries visit only the objects in that region
//! - Kernel-internal objects (idle threads, the IRQ node) have no region
//!   and are never released

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use sable_cap::{
    CdtOps, Cte, EndpointObject, MemRegion, NotificationObject, ObjectRef, SlotRef, SlotStore,
};

use super::Tcb;

/// Object payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelObject {
    /// Free slot (in free list).
    Free {
        /// Next free index, 0 at the end of the list.
        next_free: u32,
    },
    Tcb(Box<Tcb>),
    Endpoint(EndpointObject),
    Notification(NotificationObject),
    /// Capability table of `2^radix` slots.
    CNode(Box<[Cte]>),
}

impl KernelObject {
    /// Object type name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Free { .. } => "Free",
            Self::Tcb(_) => "Tcb",
            Self::Endpoint(_) => "Endpoint",
            Self::Notification(_) => "Notification",
            Self::CNode(_) => "CNode",
        }
    }
}

/// One table entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Memory the object occupies, if it came from an untyped region.
    pub region: Option<MemRegion>,
    pub body: KernelObject,
}

impl ObjectEntry {
    const fn free(next_free: u32) -> Self {
        Self {
            region: None,
            body: KernelObject::Free { next_free },
        }
    }

    /// Check if this slot is free.
    #[inline]
    pub const fn is_free(&self) -> bool {
        matches!(self.body, KernelObject::Free { .. })
    }
}

/// Arena of kernel objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectTable {
    entries: Box<[ObjectEntry]>,
    /// Head of free list (index).
    free_head: u32,
    /// Number of live objects.
    live: usize,
    /// (base address, index) of every live entry with a region.
    by_base: BTreeSet<(u64, u32)>,
}

impl ObjectTable {
    /// Create a table holding up to `capacity - 1` objects.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let mut entries: Vec<ObjectEntry> = (0..capacity)
            .map(|i| ObjectEntry::free((i + 1) as u32))
            .collect();
        // Index 0 is NULL and never handed out.
        entries[0] = ObjectEntry::free(0);
        entries[capacity - 1] = ObjectEntry::free(0);
        Self {
            entries: entries.into_boxed_slice(),
            free_head: 1,
            live: 0,
            by_base: BTreeSet::new(),
        }
    }

    /// Number of objects that can still be inserted.
    pub fn available(&self) -> usize {
        self.entries.len() - 1 - self.live
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Insert an object, returning its reference.
    pub fn insert(&mut self, region: Option<MemRegion>, body: KernelObject) -> Option<ObjectRef> {
        if self.free_head == 0 {
            return None;
        }
        let index = self.free_head;
        let entry = &mut self.entries[index as usize];
        let KernelObject::Free { next_free } = entry.body else {
            panic!("object table free list corrupt at {index}");
        };
        self.free_head = next_free;
        log::debug!("object: create {} #{}", body.name(), index);
        if let Some(r) = region {
            self.by_base.insert((r.base.0, index));
        }
        *entry = ObjectEntry { region, body };
        self.live += 1;
        Some(ObjectRef::from_index(index))
    }

    fn release(&mut self, index: u32) {
        let entry = &mut self.entries[index as usize];
        if entry.is_free() {
            return;
        }
        log::debug!("object: release {} #{}", entry.body.name(), index);
        if let Some(r) = entry.region {
            self.by_base.remove(&(r.base.0, index));
        }
        *entry = ObjectEntry::free(self.free_head);
        self.free_head = index;
        self.live -= 1;
    }

    /// Release every object carved from inside `region`.
    ///
    /// Returns the number of objects released.
    pub fn release_region(&mut self, region: MemRegion) -> usize {
        let inside: Vec<u32> = self.in_region(region).collect();
        for &index in &inside {
            self.release(index);
        }
        inside.len()
    }

    /// Number of live objects carved from inside `region`.
    pub fn count_region(&self, region: MemRegion) -> usize {
        self.in_region(region).count()
    }

    fn in_region(&self, region: MemRegion) -> impl Iterator<Item = u32> + '_ {
        self.by_base
            .range((region.base.0, 0)..=(region.top(), u32::MAX))
            .map(|&(_, index)| index)
            .filter(move |&index| {
                self.entries[index as usize]
                    .region
                    .is_some_and(|r| region.encloses(&r))
            })
    }

    /// Entry for a live object.
    ///
    /// # Panics
    ///
    /// Panics on a null or free reference; capabilities never name either.
    pub fn get(&self, r: ObjectRef) -> &ObjectEntry {
        let entry = &self.entries[r.index() as usize];
        assert!(r.is_valid() && !entry.is_free(), "dangling object reference {r}");
        entry
    }

    fn get_mut(&mut self, r: ObjectRef) -> &mut ObjectEntry {
        let entry = &mut self.entries[r.index() as usize];
        assert!(r.is_valid() && !entry.is_free(), "dangling object reference {r}");
        entry
    }

    /// Whether `r` names a live object.
    pub fn contains(&self, r: ObjectRef) -> bool {
        r.is_valid()
            && self
                .entries
                .get(r.index() as usize)
                .is_some_and(|e| !e.is_free())
    }

    pub fn tcb(&self, r: ObjectRef) -> &Tcb {
        match &self.get(r).body {
            KernelObject::Tcb(tcb) => tcb,
            other => panic!("{r} is a {}, not a TCB", other.name()),
        }
    }

    pub fn tcb_mut(&mut self, r: ObjectRef) -> &mut Tcb {
        match &mut self.get_mut(r).body {
            KernelObject::Tcb(tcb) => tcb,
            other => panic!("{r} is a {}, not a TCB", other.name()),
        }
    }

    pub fn endpoint(&self, r: ObjectRef) -> &EndpointObject {
        match &self.get(r).body {
            KernelObject::Endpoint(ep) => ep,
            other => panic!("{r} is a {}, not an endpoint", other.name()),
        }
    }

    pub fn endpoint_mut(&mut self, r: ObjectRef) -> &mut EndpointObject {
        match &mut self.get_mut(r).body {
            KernelObject::Endpoint(ep) => ep,
            other => panic!("{r} is a {}, not an endpoint", other.name()),
        }
    }

    pub fn notification(&self, r: ObjectRef) -> &NotificationObject {
        match &self.get(r).body {
            KernelObject::Notification(ntfn) => ntfn,
            other => panic!("{r} is a {}, not a notification", other.name()),
        }
    }

    pub fn notification_mut(&mut self, r: ObjectRef) -> &mut NotificationObject {
        match &mut self.get_mut(r).body {
            KernelObject::Notification(ntfn) => ntfn,
            other => panic!("{r} is a {}, not a notification", other.name()),
        }
    }
}

impl SlotStore for ObjectTable {
    fn cte(&self, at: SlotRef) -> &Cte {
        match &self.get(at.object).body {
            KernelObject::Tcb(tcb) => &tcb.slots[at.index as usize],
            KernelObject::CNode(slots) => &slots[at.index as usize],
            other => panic!("slot {at} in a {}", other.name()),
        }
    }

    fn cte_mut(&mut self, at: SlotRef) -> &mut Cte {
        match &mut self.get_mut(at.object).body {
            KernelObject::Tcb(tcb) => &mut tcb.slots[at.index as usize],
            KernelObject::CNode(slots) => &mut slots[at.index as usize],
            other => panic!("slot {at} in a {}", other.name()),
        }
    }
}

impl CdtOps for ObjectTable {
    fn object_region(&self, object: ObjectRef) -> Option<MemRegion> {
        if self.contains(object) {
            self.get(object).region
        } else {
            None
        }
    }
}
