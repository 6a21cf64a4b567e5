//! Root task capability slot layout
//!
//! Well-known slot indices in the root thread's CNode, filled in by boot.
//! Untyped capabilities for all remaining memory follow from
//! [`Slot::FirstUntyped`].

/// Well-known capability slot indices in the root CNode.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Always empty.
    Null = 0,
    /// Root thread's TCB.
    InitThreadTcb = 1,
    /// Root CNode (self-reference).
    InitThreadCNode = 2,
    /// Root VSpace.
    InitThreadVSpace = 3,
    /// IRQ control capability.
    IrqControl = 4,
    /// Domain control capability.
    Domain = 5,
    /// Root thread's IPC buffer frame.
    InitThreadIpcBuffer = 6,
    /// First untyped memory slot.
    FirstUntyped = 8,
}

impl Slot {
    /// Slot index as a CPtr-sized value.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Slot index for the `idx`-th untyped region.
    #[inline]
    #[must_use]
    pub const fn untyped(idx: u32) -> u32 {
        Self::FirstUntyped as u32 + idx
    }
}

/// Shorthand for [`Slot::FirstUntyped`].
pub const FIRST_UNTYPED: u32 = Slot::FirstUntyped as u32;
