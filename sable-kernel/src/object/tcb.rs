//! Thread control blocks

use sable_cap::{Cte, ObjectRef, SlotRef, TcbSlot, ThreadState, DEFAULT_PRIORITY};
use sable_common::VirtAddr;

use super::UserContext;
use crate::fault::Fault;

/// A thread.
///
/// Scheduling links (`sched_next`/`sched_prev`) thread the TCB through a
/// ready queue while `queued` is set; IPC links (`ep_next`/`ep_prev`)
/// thread it through an endpoint or notification queue while it is
/// blocked on one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tcb {
    pub context: UserContext,
    pub state: ThreadState,
    /// Member of a ready queue.
    pub queued: bool,
    pub priority: u8,
    /// Highest priority this thread may grant.
    pub mcp: u8,
    pub domain: u8,
    /// Ticks left in the current time slice.
    pub time_slice: u64,
    /// Core the thread runs on.
    pub affinity: usize,
    /// Fault awaiting a reply from the fault handler.
    pub fault: Fault,
    /// CPtr of the fault handler endpoint, resolved in the thread's CSpace.
    pub fault_handler: u64,
    /// User address of the IPC buffer.
    pub ipc_buffer: VirtAddr,
    pub bound_notification: ObjectRef,
    pub sched_next: ObjectRef,
    pub sched_prev: ObjectRef,
    pub ep_next: ObjectRef,
    pub ep_prev: ObjectRef,
    pub slots: [Cte; TcbSlot::COUNT as usize],
}

impl Tcb {
    /// A new inactive thread.
    pub fn new(domain: u8, time_slice: u64, affinity: usize) -> Self {
        Self {
            context: UserContext::new(),
            state: ThreadState::Inactive,
            queued: false,
            priority: DEFAULT_PRIORITY,
            mcp: DEFAULT_PRIORITY,
            domain,
            time_slice,
            affinity,
            fault: Fault::Null,
            fault_handler: 0,
            ipc_buffer: VirtAddr(0),
            bound_notification: ObjectRef::NULL,
            sched_next: ObjectRef::NULL,
            sched_prev: ObjectRef::NULL,
            ep_next: ObjectRef::NULL,
            ep_prev: ObjectRef::NULL,
            slots: [Cte::EMPTY; TcbSlot::COUNT as usize],
        }
    }

    /// The idle thread of a core.
    pub fn idle(affinity: usize) -> Self {
        Self {
            state: ThreadState::Idle,
            ..Self::new(0, 0, affinity)
        }
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state.is_runnable()
    }
}

/// Reference to one of a TCB's embedded slots.
#[inline]
pub const fn tcb_slot(tcb: ObjectRef, slot: TcbSlot) -> SlotRef {
    SlotRef::new(tcb, slot.index())
}
