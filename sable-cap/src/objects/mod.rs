//! Kernel object metadata
//!
//! Object types that can be created by retyping untyped memory, their
//! sizes, and the state records the kernel keeps for IPC objects and
//! threads.
//!
//! # Object Categories
//!
//! ## Memory Objects
//! - Untyped: raw physical memory, retyped into everything else
//! - Frame / LargeFrame: 4 KiB and 2 MiB pages
//! - PageTable / VSpace: translation tables; a VSpace is a root table
//!
//! ## IPC Objects
//! - [`EndpointObject`]: synchronous rendezvous, queue of blocked threads
//! - [`NotificationObject`]: one-word asynchronous accumulator
//!
//! ## Execution Objects
//! - CapTable: an array of `2^radix` capability slots
//! - TCB: thread state plus [`TcbSlot::COUNT`] embedded slots

pub mod endpoint;
pub mod irq;
pub mod tcb;
pub mod untyped;

pub use endpoint::{
    EndpointObject, EndpointState, NotificationObject, NotificationState, TcbQueue,
};
pub use irq::{IrqNumber, IrqState};
pub use tcb::{ThreadState, TcbSlot, DEFAULT_PRIORITY, MAX_PRIORITY};

/// log2 size of a TCB.
pub const TCB_BITS: u8 = 10;
/// log2 size of an endpoint.
pub const ENDPOINT_BITS: u8 = 4;
/// log2 size of a notification.
pub const NOTIFICATION_BITS: u8 = 5;
/// log2 size of one capability slot.
pub const SLOT_BITS: u8 = 5;
/// log2 size of a small page.
pub const PAGE_BITS: u8 = 12;
/// log2 size of a large page.
pub const LARGE_PAGE_BITS: u8 = 21;
/// log2 size of a page table (and of a VSpace root).
pub const PAGE_TABLE_BITS: u8 = 12;
/// Smallest untyped that may be created.
pub const MIN_UNTYPED_BITS: u8 = 4;
/// Largest untyped that may be created.
pub const MAX_UNTYPED_BITS: u8 = 47;

/// Object type requested from a retype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    /// Smaller untyped region.
    Untyped = 0,
    /// Thread control block.
    Tcb = 1,
    /// Endpoint.
    Endpoint = 2,
    /// Notification.
    Notification = 3,
    /// CNode of `2^user_size` slots.
    CapTable = 4,
    /// 4 KiB frame.
    Frame = 5,
    /// 2 MiB frame.
    LargeFrame = 6,
    /// Intermediate page table.
    PageTable = 7,
    /// Root page table of an address space.
    VSpace = 8,
}

impl ObjectType {
    /// Decode a type word from a retype invocation.
    #[must_use]
    pub const fn from_word(word: u64) -> Option<Self> {
        Some(match word {
            0 => Self::Untyped,
            1 => Self::Tcb,
            2 => Self::Endpoint,
            3 => Self::Notification,
            4 => Self::CapTable,
            5 => Self::Frame,
            6 => Self::LargeFrame,
            7 => Self::PageTable,
            8 => Self::VSpace,
            _ => return None,
        })
    }

    /// log2 size of one object of this type.
    ///
    /// `user_size` is only meaningful for untyped (the object's own size)
    /// and CapTable (the radix). The result is not range checked.
    #[must_use]
    pub const fn size_bits(self, user_size: u64) -> u64 {
        match self {
            Self::Untyped => user_size,
            Self::Tcb => TCB_BITS as u64,
            Self::Endpoint => ENDPOINT_BITS as u64,
            Self::Notification => NOTIFICATION_BITS as u64,
            Self::CapTable => user_size + SLOT_BITS as u64,
            Self::Frame => PAGE_BITS as u64,
            Self::LargeFrame => LARGE_PAGE_BITS as u64,
            Self::PageTable | Self::VSpace => PAGE_TABLE_BITS as u64,
        }
    }

    /// Frames may be created from device memory; nothing else but untyped.
    #[inline]
    #[must_use]
    pub const fn is_frame_type(self) -> bool {
        matches!(self, Self::Frame | Self::LargeFrame)
    }

    /// Human-readable name for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Untyped => "Untyped",
            Self::Tcb => "TCB",
            Self::Endpoint => "Endpoint",
            Self::Notification => "Notification",
            Self::CapTable => "CapTable",
            Self::Frame => "Frame",
            Self::LargeFrame => "LargeFrame",
            Self::PageTable => "PageTable",
            Self::VSpace => "VSpace",
        }
    }
}

impl core::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_type_words() {
        for word in 0..9 {
            let ty = ObjectType::from_word(word).unwrap();
            assert_eq!(ty as u64, word);
        }
        assert_eq!(ObjectType::from_word(9), None);
    }

    #[test]
    fn test_object_sizes() {
        assert_eq!(ObjectType::Tcb.size_bits(0), 10);
        assert_eq!(ObjectType::CapTable.size_bits(4), 9);
        assert_eq!(ObjectType::Untyped.size_bits(16), 16);
        assert_eq!(ObjectType::LargeFrame.size_bits(0), 21);
        assert!(ObjectType::Frame.is_frame_type());
        assert!(!ObjectType::PageTable.is_frame_type());
    }
}
