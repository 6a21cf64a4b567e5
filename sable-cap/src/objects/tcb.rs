//! Thread control block state
//!
//! # Thread State Machine
//!
//! ```text
//! Inactive --resume--> Restart --activate--> Running
//! Running --send--> BlockedOnSend --rendezvous--> Running | BlockedOnReply | Inactive
//! Running --recv--> BlockedOnReceive | BlockedOnNotification --wake--> Running
//! BlockedOnReply --reply--> Running | Restart | Inactive
//! any --suspend--> Inactive
//! ```
//!
//! Only `Running` and `Restart` threads may sit in a ready queue.

use crate::{Badge, ObjectRef};

/// Highest priority.
pub const MAX_PRIORITY: u8 = 255;

/// Priority given to threads created by retype.
pub const DEFAULT_PRIORITY: u8 = 0;

/// Capability slots embedded in every TCB.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TcbSlot {
    /// CSpace root.
    CTable = 0,
    /// VSpace root.
    VTable = 1,
    /// Reply master capability.
    Reply = 2,
    /// Reply capability of the thread that last called this one.
    Caller = 3,
    /// Frame holding the IPC buffer.
    IpcBuffer = 4,
}

impl TcbSlot {
    /// Number of embedded slots.
    pub const COUNT: u32 = 5;

    /// Slot index inside the TCB.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self as u32
    }
}

/// Thread state, with the data each blocked state needs to resume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ThreadState {
    /// Not runnable and not blocked on anything.
    #[default]
    Inactive,
    /// Runnable; resumes at NextIP.
    Running,
    /// Runnable; re-executes the faulting or interrupted instruction.
    Restart,
    /// Blocked receiving on an endpoint.
    BlockedOnReceive {
        /// Endpoint waited on.
        endpoint: ObjectRef,
        /// Receive capability carried the grant right; a caller's reply
        /// capability inherits it.
        can_grant: bool,
    },
    /// Blocked sending on an endpoint.
    BlockedOnSend {
        /// Endpoint waited on.
        endpoint: ObjectRef,
        /// Badge of the capability used to send.
        badge: Badge,
        /// Sender may grant capabilities.
        can_grant: bool,
        /// Sender may grant through the reply.
        can_grant_reply: bool,
        /// Send is the first half of a Call.
        is_call: bool,
    },
    /// Blocked waiting on a notification.
    BlockedOnNotification {
        /// Notification waited on.
        notification: ObjectRef,
    },
    /// Waiting for a reply after a Call or a fault.
    BlockedOnReply,
    /// Per-core idle thread.
    Idle,
}

impl ThreadState {
    /// Runnable threads are eligible for the ready queues.
    #[inline]
    #[must_use]
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::Running | Self::Restart)
    }

    /// Neither runnable nor blocked on an IPC object.
    #[inline]
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Inactive | Self::BlockedOnReply)
    }

    /// Blocked on an endpoint or notification queue.
    #[inline]
    #[must_use]
    pub const fn is_blocked_on_object(self) -> bool {
        matches!(
            self,
            Self::BlockedOnReceive { .. }
                | Self::BlockedOnSend { .. }
                | Self::BlockedOnNotification { .. }
        )
    }

    /// Name for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Inactive => "Inactive",
            Self::Running => "Running",
            Self::Restart => "Restart",
            Self::BlockedOnReceive { .. } => "BlockedOnReceive",
            Self::BlockedOnSend { .. } => "BlockedOnSend",
            Self::BlockedOnNotification { .. } => "BlockedOnNotification",
            Self::BlockedOnReply => "BlockedOnReply",
            Self::Idle => "Idle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_state_classes() {
        assert!(ThreadState::Restart.is_runnable());
        assert!(!ThreadState::BlockedOnReply.is_runnable());
        assert!(ThreadState::BlockedOnReply.is_stopped());
        assert!(ThreadState::BlockedOnReceive {
            endpoint: ObjectRef::from_index(1),
            can_grant: false,
        }
        .is_blocked_on_object());
        assert!(!ThreadState::Idle.is_runnable());
    }
}
