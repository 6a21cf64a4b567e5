//! IPC buffer layout
//!
//! Each thread may register one IPC buffer: a 1 KiB, naturally aligned
//! region inside a frame it can write. Message words beyond the ones passed
//! in registers, extra capability pointers, and the receive window live
//! here.
//!
//! # Memory Layout
//!
//! | Word | Contents |
//! |------|----------|
//! | 0 | message tag |
//! | 1..=120 | message registers |
//! | 121 | user data (TLS-style pointer, unused by the kernel) |
//! | 122..=124 | extra cap pointers (send) or badges (receive) |
//! | 125 | receive CNode |
//! | 126 | receive index |
//! | 127 | receive depth |

use crate::message::{MAX_EXTRA_CAPS, MSG_MAX_LENGTH};

/// log2 size of the IPC buffer.
pub const IPC_BUFFER_SIZE_BITS: u8 = 10;

/// Size of the IPC buffer in bytes.
pub const IPC_BUFFER_SIZE: usize = 1 << IPC_BUFFER_SIZE_BITS;

/// Size of the IPC buffer in words.
pub const IPC_BUFFER_WORDS: usize = IPC_BUFFER_SIZE / 8;

/// Word index of the message tag.
pub const TAG_OFFSET: usize = 0;
/// Word index of message register 0.
pub const MSG_OFFSET: usize = 1;
/// Word index of the user data word.
pub const USER_DATA_OFFSET: usize = MSG_OFFSET + MSG_MAX_LENGTH as usize;
/// Word index of the first extra cap pointer or badge.
pub const CAPS_OFFSET: usize = USER_DATA_OFFSET + 1;
/// Word index of the receive CNode pointer.
pub const RECEIVE_CNODE_OFFSET: usize = CAPS_OFFSET + MAX_EXTRA_CAPS as usize;
/// Word index of the receive slot index.
pub const RECEIVE_INDEX_OFFSET: usize = RECEIVE_CNODE_OFFSET + 1;
/// Word index of the receive depth.
pub const RECEIVE_DEPTH_OFFSET: usize = RECEIVE_INDEX_OFFSET + 1;

/// IPC buffer structure, as user space sees it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IpcBuffer {
    /// Message tag.
    pub tag: u64,
    /// Message registers.
    pub msg: [u64; MSG_MAX_LENGTH as usize],
    /// Free for user use.
    pub user_data: u64,
    /// Extra cap pointers to send, or badges of unwrapped caps received.
    pub caps_or_badges: [u64; MAX_EXTRA_CAPS as usize],
    /// Where received capabilities go.
    pub receive: CapTransfer,
}

impl Default for IpcBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl IpcBuffer {
    /// Create a new zeroed IPC buffer.
    pub const fn new() -> Self {
        Self {
            tag: 0,
            msg: [0; MSG_MAX_LENGTH as usize],
            user_data: 0,
            caps_or_badges: [0; MAX_EXTRA_CAPS as usize],
            receive: CapTransfer {
                cnode: 0,
                index: 0,
                depth: 0,
            },
        }
    }
}

/// Receive window: the slot a received capability is stored in.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapTransfer {
    /// CPtr of the CNode holding the target slot.
    pub cnode: u64,
    /// Index of the slot, resolved from `cnode`.
    pub index: u64,
    /// Depth used to resolve `index`.
    pub depth: u64,
}

// The buffer fills its naturally aligned region exactly.
const _: () = assert!(
    core::mem::size_of::<IpcBuffer>() == IPC_BUFFER_SIZE,
    "IpcBuffer must fill its region"
);

const _: () = assert!(RECEIVE_DEPTH_OFFSET == IPC_BUFFER_WORDS - 1);
