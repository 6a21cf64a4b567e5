//! The capability value type
//!
//! [`Cap`] is a closed sum type: every capability-type-specific behaviour
//! (derive, finalise, mask rights, region comparison) is an exhaustive
//! `match` over it. Capabilities are plain values; copying one into a slot
//! never touches the object it names.

use core::fmt;

use sable_common::{PhysAddr, VirtAddr};

use crate::cnode::{CNodeCapData, WORD_BITS};
use crate::objects::{IrqNumber, TcbSlot};
use crate::{Badge, CapRights, ObjectRef, VmRights};

/// What a Zombie is still in the middle of destroying.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ZombieKind {
    /// A CNode of `2^radix` slots.
    CNode {
        /// Radix of the CNode being destroyed.
        radix: u8,
    },
    /// A TCB and its embedded slots.
    Tcb,
}

impl ZombieKind {
    /// Number of slots the destroyed object owns.
    #[inline]
    #[must_use]
    pub const fn slot_count(self) -> u64 {
        match self {
            Self::CNode { radix } => 1u64 << radix,
            Self::Tcb => TcbSlot::COUNT as u64,
        }
    }
}

/// Where a frame or page table is mapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameMapping {
    /// Physical base of the VSpace root the mapping lives in.
    pub vspace: PhysAddr,
    /// Virtual address of the mapping.
    pub vaddr: VirtAddr,
}

/// A capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Cap {
    /// Empty slot.
    #[default]
    Null,
    /// Raw memory that can be retyped into objects.
    Untyped {
        /// Physical base of the region.
        base: PhysAddr,
        /// Region size is `2^size_bits` bytes.
        size_bits: u8,
        /// Byte offset of the first free byte.
        free_offset: u64,
        /// Device memory: never zeroed, only frames and untypeds come out.
        is_device: bool,
    },
    /// Synchronous IPC endpoint.
    Endpoint {
        /// Endpoint object.
        object: ObjectRef,
        /// Badge delivered to receivers.
        badge: Badge,
        /// Read = receive, Write = send, Grant, GrantReply.
        rights: CapRights,
    },
    /// Asynchronous notification.
    Notification {
        /// Notification object.
        object: ObjectRef,
        /// Badge ORed into the signal word.
        badge: Badge,
        /// Read = wait, Write = signal.
        rights: CapRights,
    },
    /// Reply right to a thread blocked in Call. The master variant lives in
    /// the thread's own reply slot and is the derivation parent of every
    /// one-shot reply capability.
    Reply {
        /// Thread that will be resumed.
        tcb: ObjectRef,
        /// Master reply capability.
        master: bool,
        /// Replies may transfer capabilities.
        can_grant: bool,
    },
    /// Capability table.
    CNode {
        /// CNode object.
        object: ObjectRef,
        /// `2^radix` slots.
        radix: u8,
        /// Number of guard bits.
        guard_size: u8,
        /// Guard value.
        guard: u64,
    },
    /// Thread control.
    Thread {
        /// TCB object.
        tcb: ObjectRef,
    },
    /// Authority to move threads between scheduling domains.
    Domain,
    /// Authority to create IRQ handler capabilities.
    IrqControl,
    /// Authority over one interrupt line.
    IrqHandler {
        /// The line.
        irq: IrqNumber,
    },
    /// Partially destroyed CNode or TCB.
    Zombie {
        /// Object whose slots are still being emptied.
        object: ObjectRef,
        /// CNode or TCB.
        kind: ZombieKind,
        /// Slots not yet emptied, counting down from the top.
        number: u64,
    },
    /// Physical page.
    Frame {
        /// Physical base.
        base: PhysAddr,
        /// Page size is `2^size_bits` bytes.
        size_bits: u8,
        /// Access rights of any mapping.
        rights: VmRights,
        /// Device memory.
        is_device: bool,
        /// Current mapping, if any.
        mapping: Option<FrameMapping>,
    },
    /// Page table, or an address-space root when `is_root` is set.
    PageTable {
        /// Physical base.
        base: PhysAddr,
        /// Top-level table usable as a VSpace root.
        is_root: bool,
        /// Where a non-root table is installed, if anywhere.
        mapping: Option<FrameMapping>,
    },
}

/// Capability type discriminant, used for logging and dispatch tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CapType {
    /// [`Cap::Null`].
    Null = 0,
    /// [`Cap::Untyped`].
    Untyped = 1,
    /// [`Cap::Endpoint`].
    Endpoint = 2,
    /// [`Cap::Notification`].
    Notification = 3,
    /// [`Cap::Reply`].
    Reply = 4,
    /// [`Cap::CNode`].
    CNode = 5,
    /// [`Cap::Thread`].
    Thread = 6,
    /// [`Cap::Domain`].
    Domain = 7,
    /// [`Cap::IrqControl`].
    IrqControl = 8,
    /// [`Cap::IrqHandler`].
    IrqHandler = 9,
    /// [`Cap::Zombie`].
    Zombie = 10,
    /// [`Cap::Frame`].
    Frame = 11,
    /// [`Cap::PageTable`].
    PageTable = 12,
}

impl CapType {
    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Untyped => "Untyped",
            Self::Endpoint => "Endpoint",
            Self::Notification => "Notification",
            Self::Reply => "Reply",
            Self::CNode => "CNode",
            Self::Thread => "Thread",
            Self::Domain => "Domain",
            Self::IrqControl => "IrqControl",
            Self::IrqHandler => "IrqHandler",
            Self::Zombie => "Zombie",
            Self::Frame => "Frame",
            Self::PageTable => "PageTable",
        }
    }
}

impl fmt::Display for CapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Cap {
    /// Type discriminant.
    #[must_use]
    pub const fn cap_type(&self) -> CapType {
        match self {
            Self::Null => CapType::Null,
            Self::Untyped { .. } => CapType::Untyped,
            Self::Endpoint { .. } => CapType::Endpoint,
            Self::Notification { .. } => CapType::Notification,
            Self::Reply { .. } => CapType::Reply,
            Self::CNode { .. } => CapType::CNode,
            Self::Thread { .. } => CapType::Thread,
            Self::Domain => CapType::Domain,
            Self::IrqControl => CapType::IrqControl,
            Self::IrqHandler { .. } => CapType::IrqHandler,
            Self::Zombie { .. } => CapType::Zombie,
            Self::Frame { .. } => CapType::Frame,
            Self::PageTable { .. } => CapType::PageTable,
        }
    }

    /// Whether this is the null capability.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Architecture (address-space) capability.
    #[inline]
    #[must_use]
    pub const fn is_arch(&self) -> bool {
        matches!(self, Self::Frame { .. } | Self::PageTable { .. })
    }

    /// Kernel object named by this capability, if it names one.
    #[must_use]
    pub const fn object(&self) -> Option<ObjectRef> {
        match *self {
            Self::Endpoint { object, .. }
            | Self::Notification { object, .. }
            | Self::CNode { object, .. }
            | Self::Zombie { object, .. } => Some(object),
            Self::Thread { tcb } | Self::Reply { tcb, .. } => Some(tcb),
            _ => None,
        }
    }

    /// Physical memory range directly described by this capability.
    #[must_use]
    pub const fn memory_range(&self) -> Option<(PhysAddr, u8)> {
        match *self {
            Self::Untyped {
                base, size_bits, ..
            }
            | Self::Frame {
                base, size_bits, ..
            } => Some((base, size_bits)),
            Self::PageTable { base, .. } => Some((base, crate::objects::PAGE_TABLE_BITS)),
            _ => None,
        }
    }

    /// Badge of an endpoint or notification capability.
    #[must_use]
    pub const fn badge(&self) -> Badge {
        match *self {
            Self::Endpoint { badge, .. } | Self::Notification { badge, .. } => badge,
            _ => Badge::NONE,
        }
    }

    /// Rights of an endpoint or notification capability.
    #[must_use]
    pub const fn ipc_rights(&self) -> CapRights {
        match *self {
            Self::Endpoint { rights, .. } | Self::Notification { rights, .. } => rights,
            _ => CapRights::NONE,
        }
    }

    /// Send right (endpoint) or signal right (notification).
    #[inline]
    #[must_use]
    pub const fn can_send(&self) -> bool {
        self.ipc_rights().has_write()
    }

    /// Receive right (endpoint) or wait right (notification).
    #[inline]
    #[must_use]
    pub const fn can_receive(&self) -> bool {
        self.ipc_rights().has_read()
    }

    /// Grant right of an endpoint capability.
    #[inline]
    #[must_use]
    pub const fn can_grant(&self) -> bool {
        self.ipc_rights().has_grant()
    }

    /// GrantReply right of an endpoint capability.
    #[inline]
    #[must_use]
    pub const fn can_grant_reply(&self) -> bool {
        self.ipc_rights().has_grant_reply()
    }

    /// Full rights over an endpoint, required to cancel badged sends.
    #[must_use]
    pub const fn has_cancel_send_rights(&self) -> bool {
        match *self {
            Self::Endpoint { rights, .. } => rights.contains(CapRights::ALL),
            _ => false,
        }
    }

    /// A page table that can serve as a thread's address-space root.
    #[inline]
    #[must_use]
    pub const fn is_valid_vtable_root(&self) -> bool {
        matches!(self, Self::PageTable { is_root: true, .. })
    }

    /// Free bytes left in an untyped capability.
    #[must_use]
    pub const fn untyped_free_bytes(&self) -> u64 {
        match *self {
            Self::Untyped {
                size_bits,
                free_offset,
                ..
            } => (1u64 << size_bits) - free_offset,
            _ => 0,
        }
    }

    /// Whether a capability derived as `self` from `src` may revoke what is
    /// later derived from it.
    ///
    /// Endpoint and notification copies are revocable only when they change
    /// the badge, which makes them the first of a new badge class. IRQ
    /// handlers are revocable when issued by the IRQ control capability.
    #[must_use]
    pub fn is_revocable_from(&self, src: &Cap) -> bool {
        match self {
            Self::Endpoint { badge, .. } | Self::Notification { badge, .. } => *badge != src.badge(),
            Self::IrqHandler { .. } => matches!(src, Self::IrqControl),
            Self::Untyped { .. } => true,
            _ => false,
        }
    }

    /// Attenuate the rights carried by this capability.
    #[must_use]
    pub fn mask_rights(self, mask: CapRights) -> Cap {
        match self {
            Self::Endpoint {
                object,
                badge,
                rights,
            } => Self::Endpoint {
                object,
                badge,
                rights: rights & mask,
            },
            Self::Notification {
                object,
                badge,
                rights,
            } => Self::Notification {
                object,
                badge,
                rights: rights & mask & CapRights::RW,
            },
            Self::Reply {
                tcb,
                master,
                can_grant,
            } => Self::Reply {
                tcb,
                master,
                can_grant: can_grant && mask.has_grant(),
            },
            Self::Frame {
                base,
                size_bits,
                rights,
                is_device,
                mapping,
            } => Self::Frame {
                base,
                size_bits,
                rights: rights.mask(mask),
                is_device,
                mapping,
            },
            other => other,
        }
    }

    /// Apply user-supplied data to a capability.
    ///
    /// Sets the badge of an unbadged endpoint or notification, or the guard
    /// of a CNode. Returns [`Cap::Null`] when the data cannot be applied:
    /// re-badging, badging while `preserve` is set, or a guard that would
    /// not fit in a word together with the radix.
    #[must_use]
    pub fn update_data(self, preserve: bool, data: u64) -> Cap {
        match self {
            Self::Endpoint {
                object,
                badge,
                rights,
            } => {
                if !preserve && badge.is_none() {
                    Self::Endpoint {
                        object,
                        badge: Badge::new(data),
                        rights,
                    }
                } else {
                    Self::Null
                }
            }
            Self::Notification {
                object,
                badge,
                rights,
            } => {
                if !preserve && badge.is_none() {
                    Self::Notification {
                        object,
                        badge: Badge::new(data),
                        rights,
                    }
                } else {
                    Self::Null
                }
            }
            Self::CNode { object, radix, .. } => {
                let data = CNodeCapData::from_word(data);
                if u32::from(data.guard_size) + u32::from(radix) > WORD_BITS {
                    Self::Null
                } else {
                    Self::CNode {
                        object,
                        radix,
                        guard_size: data.guard_size,
                        guard: data.masked_guard(),
                    }
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for Cap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Untyped {
                base,
                size_bits,
                free_offset,
                is_device,
            } => write!(
                f,
                "Untyped({base}, 2^{size_bits}, free@{free_offset:#x}{})",
                if *is_device { ", device" } else { "" }
            ),
            Self::Endpoint {
                object,
                badge,
                rights,
            } => write!(f, "Endpoint({object}, badge {badge}, {rights})"),
            Self::Notification {
                object,
                badge,
                rights,
            } => write!(f, "Notification({object}, badge {badge}, {rights})"),
            Self::Reply { tcb, master, .. } => {
                write!(f, "Reply({tcb}{})", if *master { ", master" } else { "" })
            }
            Self::CNode {
                object,
                radix,
                guard_size,
                guard,
            } => write!(f, "CNode({object}, radix {radix}, guard {guard:#x}/{guard_size})"),
            Self::Thread { tcb } => write!(f, "Thread({tcb})"),
            Self::Domain => write!(f, "Domain"),
            Self::IrqControl => write!(f, "IrqControl"),
            Self::IrqHandler { irq } => write!(f, "IrqHandler({irq})"),
            Self::Zombie {
                object,
                kind,
                number,
            } => write!(f, "Zombie({object}, {kind:?}, {number})"),
            Self::Frame {
                base, size_bits, ..
            } => write!(f, "Frame({base}, 2^{size_bits})"),
            Self::PageTable { base, is_root, .. } => {
                write!(f, "PageTable({base}{})", if *is_root { ", root" } else { "" })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(badge: u64, rights: CapRights) -> Cap {
        Cap::Endpoint {
            object: ObjectRef::from_index(4),
            badge: Badge::new(badge),
            rights,
        }
    }

    #[test]
    fn test_badging_unbadged_endpoint() {
        let minted = ep(0, CapRights::ALL).update_data(false, 7);
        assert_eq!(minted.badge(), Badge::new(7));
    }

    #[test]
    fn test_rebadging_is_refused() {
        assert_eq!(ep(3, CapRights::ALL).update_data(false, 7), Cap::Null);
        assert_eq!(ep(0, CapRights::ALL).update_data(true, 7), Cap::Null);
    }

    #[test]
    fn test_mask_rights_endpoint() {
        let masked = ep(0, CapRights::ALL).mask_rights(CapRights::WRITE);
        assert!(masked.can_send());
        assert!(!masked.can_receive());
        assert!(!masked.can_grant());
    }

    #[test]
    fn test_mask_rights_leaves_other_caps() {
        let cap = Cap::Thread {
            tcb: ObjectRef::from_index(2),
        };
        assert_eq!(cap.mask_rights(CapRights::NONE), cap);
    }

    #[test]
    fn test_cnode_guard_update() {
        let cnode = Cap::CNode {
            object: ObjectRef::from_index(1),
            radix: 8,
            guard_size: 0,
            guard: 0,
        };
        let updated = cnode.update_data(true, (0x5 << 6) | 4);
        assert_eq!(
            updated,
            Cap::CNode {
                object: ObjectRef::from_index(1),
                radix: 8,
                guard_size: 4,
                guard: 0x5,
            }
        );
        assert_eq!(cnode.update_data(false, 60), Cap::Null);
    }

    #[test]
    fn test_revocability() {
        let unbadged = ep(0, CapRights::ALL);
        let badged = ep(7, CapRights::ALL);
        assert!(badged.is_revocable_from(&unbadged));
        assert!(!badged.is_revocable_from(&badged));
        assert!(!unbadged.is_revocable_from(&unbadged));
        assert!(Cap::IrqHandler { irq: IrqNumber(3) }.is_revocable_from(&Cap::IrqControl));
    }

    #[test]
    fn test_cancel_send_rights() {
        assert!(ep(1, CapRights::ALL).has_cancel_send_rights());
        assert!(!ep(1, CapRights::RW).has_cancel_send_rights());
    }

    #[test]
    fn test_zombie_slot_counts() {
        assert_eq!(ZombieKind::CNode { radix: 4 }.slot_count(), 16);
        assert_eq!(ZombieKind::Tcb.slot_count(), 5);
    }
}
