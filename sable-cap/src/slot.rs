//! Capability slot storage
//!
//! A capability slot (CTE) holds exactly one capability plus the two links
//! that place it in the derivation tree. Slots live inside CNodes and
//! inside TCBs; the kernel addresses them by [`SlotRef`], an index pair
//! into its object table.

use core::fmt;

use crate::Cap;

/// Object reference - kernel-internal index to the actual object.
///
/// This is an index into the kernel's object table, not a raw pointer.
/// Index 0 is reserved for [`ObjectRef::NULL`].
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjectRef(u32);

impl ObjectRef {
    /// Null reference (no object).
    pub const NULL: Self = Self(0);

    /// Create an object reference from a raw index.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index value.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Check if this is a null reference.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check if this is a valid (non-null) reference.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// `None` for the null reference, `Some(self)` otherwise.
    #[inline]
    #[must_use]
    pub const fn non_null(self) -> Option<Self> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "ObjectRef::NULL")
        } else {
            write!(f, "ObjectRef({})", self.0)
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Location of one capability slot: the object that contains it (a CNode
/// or a TCB) and the index within that object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotRef {
    /// Containing CNode or TCB.
    pub object: ObjectRef,
    /// Slot index within the container.
    pub index: u32,
}

impl SlotRef {
    /// Create a slot reference.
    #[inline]
    #[must_use]
    pub const fn new(object: ObjectRef, index: u32) -> Self {
        Self { object, index }
    }

    /// The slot `offset` places after this one in the same container.
    #[inline]
    #[must_use]
    pub const fn offset(self, offset: u32) -> Self {
        Self {
            object: self.object,
            index: self.index + offset,
        }
    }
}

impl fmt::Debug for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotRef({}[{}])", self.object, self.index)
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.object, self.index)
    }
}

/// Derivation-tree node embedded in every slot.
///
/// `revocable` marks a slot whose capability may revoke the slots that
/// follow it; `first_badged` marks the first slot carrying a given badge,
/// which separates badge classes of the same endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MdbNode {
    /// Previous slot in derivation order.
    pub prev: Option<SlotRef>,
    /// Next slot in derivation order.
    pub next: Option<SlotRef>,
    /// May revoke its descendants.
    pub revocable: bool,
    /// First slot of a badge class.
    pub first_badged: bool,
}

impl MdbNode {
    /// Node of an empty slot.
    pub const NULL: Self = Self {
        prev: None,
        next: None,
        revocable: false,
        first_badged: false,
    };

    /// Whether the node is linked to nothing and carries no flags.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Debug for MdbNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdbNode")
            .field("prev", &self.prev)
            .field("next", &self.next)
            .field("revocable", &self.revocable)
            .field("first_badged", &self.first_badged)
            .finish()
    }
}

/// One capability table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Cte {
    /// The capability stored in this slot.
    pub cap: Cap,
    /// Position in the derivation tree.
    pub mdb: MdbNode,
}

impl Cte {
    /// An empty slot.
    pub const EMPTY: Self = Self {
        cap: Cap::Null,
        mdb: MdbNode::NULL,
    };

    /// Whether the slot holds no capability.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self.cap, Cap::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_null() {
        assert!(ObjectRef::NULL.is_null());
        assert_eq!(ObjectRef::NULL.non_null(), None);
        assert_eq!(ObjectRef::from_index(3).non_null(), Some(ObjectRef::from_index(3)));
    }

    #[test]
    fn test_slot_ref_offset() {
        let slot = SlotRef::new(ObjectRef::from_index(7), 2);
        assert_eq!(slot.offset(3), SlotRef::new(ObjectRef::from_index(7), 5));
    }

    #[test]
    fn test_empty_cte() {
        assert!(Cte::EMPTY.is_empty());
        assert!(Cte::EMPTY.mdb.is_null());
        assert_eq!(Cte::default(), Cte::EMPTY);
    }
}
