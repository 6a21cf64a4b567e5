//! IPC fast path
//!
//! Call and ReplyRecv between two threads on the same core are the
//! common case of every RPC, so they get a specialised path that skips
//! the general decode and dispatch. Each function first checks every
//! precondition without touching any state; the first mutation is the
//! point of no return, after which it cannot fail. When any check fails
//! the caller takes the general path instead, which produces the same
//! result.
//!
//! # Preconditions
//!
//! - The message has no extra capabilities and fits in registers.
//! - The current thread has no pending fault.
//! - The capability is an endpoint with the needed rights, and the other
//!   side is already waiting.
//! - The thread that will run next has a valid VSpace root, shares the
//!   current domain and core, and would be chosen by the scheduler anyway.

use sable_cap::{
    Badge, Cap, EndpointState, MdbNode, ObjectRef, SlotStore, TcbSlot, ThreadState,
};
use sable_common::addr::mask;
use sable_syscall::{MessageInfo, N_MSG_REGISTERS};

use super::queue::{ep_append, ep_dequeue};
use crate::object::context::{BADGE_REG, MSG_INFO_REG, MSG_REGISTERS};
use crate::object::tcb::tcb_slot;
use crate::KernelState;

/// Message-info bits holding the length and extra-cap count.
const MI_CHECK_BITS: u32 = 9;

/// Whether a raw message-info word rules out the fast path.
#[inline]
const fn mi_check(info: u64) -> bool {
    info & mask(MI_CHECK_BITS) > N_MSG_REGISTERS as u64
}

impl KernelState {
    fn fastpath_domain(&self) -> u8 {
        if self.config.num_domains > 1 {
            self.cur_domain()
        } else {
            0
        }
    }

    fn has_valid_vtable(&self, t: ObjectRef) -> bool {
        self.objects
            .cte(tcb_slot(t, TcbSlot::VTable))
            .cap
            .is_valid_vtable_root()
    }

    fn fastpath_copy_mrs(&mut self, length: usize, src: ObjectRef, dest: ObjectRef) {
        let src_ctx = self.objects.tcb(src).context;
        let dest_ctx = &mut self.objects.tcb_mut(dest).context;
        for &reg in &MSG_REGISTERS[..length] {
            dest_ctx.set(reg, src_ctx.get(reg));
        }
    }

    fn fastpath_restore(&mut self, badge: Badge, info: MessageInfo) {
        let cur = self.cur_thread();
        let ctx = &mut self.objects.tcb_mut(cur).context;
        ctx.set(BADGE_REG, badge.value());
        ctx.set(MSG_INFO_REG, MessageInfo { caps_unwrapped: 0, ..info }.to_word());
    }

    /// Attempt a Call on `cptr`. Returns `false`, having changed nothing,
    /// when the general path must handle it.
    pub fn fastpath_call(&mut self, cptr: u64, msg_info: u64) -> bool {
        let cur = self.cur_thread();
        let info = MessageInfo::from_raw(msg_info);
        if mi_check(msg_info) || !self.objects.tcb(cur).fault.is_null() {
            return false;
        }

        let Ok(Cap::Endpoint {
            object: ep,
            badge,
            rights,
        }) = self.lookup_cap(cur, cptr)
        else {
            return false;
        };
        if !rights.has_write() {
            return false;
        }

        let endpoint = *self.objects.endpoint(ep);
        if endpoint.state != EndpointState::Recv {
            return false;
        }
        let dest = endpoint.queue.head;
        if !self.has_valid_vtable(dest) {
            return false;
        }

        let dest_tcb = self.objects.tcb(dest);
        let cur_tcb = self.objects.tcb(cur);
        if dest_tcb.priority < cur_tcb.priority
            && !self.is_highest_prio(self.fastpath_domain(), dest_tcb.priority)
        {
            return false;
        }
        if !rights.has_grant() && !rights.has_grant_reply() {
            return false;
        }
        if self.config.num_domains > 1 && dest_tcb.domain != self.cur_domain() {
            return false;
        }
        if dest_tcb.affinity != cur_tcb.affinity {
            return false;
        }
        let ThreadState::BlockedOnReceive {
            can_grant: reply_can_grant,
            ..
        } = dest_tcb.state
        else {
            return false;
        };

        // Point of no return.
        let queue = ep_dequeue(&mut self.objects, endpoint.queue, dest);
        self.objects
            .endpoint_mut(ep)
            .set_queue(queue, EndpointState::Recv);

        self.objects.tcb_mut(cur).state = ThreadState::BlockedOnReply;

        let reply_slot = tcb_slot(cur, TcbSlot::Reply);
        let caller_slot = tcb_slot(dest, TcbSlot::Caller);
        let caller = self.objects.cte_mut(caller_slot);
        caller.cap = Cap::Reply {
            tcb: cur,
            master: false,
            can_grant: reply_can_grant,
        };
        caller.mdb = MdbNode {
            prev: Some(reply_slot),
            ..caller.mdb
        };
        let master = &mut self.objects.cte_mut(reply_slot).mdb;
        master.next = Some(caller_slot);
        master.revocable = true;
        master.first_badged = true;

        self.fastpath_copy_mrs(info.length as usize, cur, dest);
        self.objects.tcb_mut(dest).state = ThreadState::Running;
        self.switch_to_thread(dest);
        self.fastpath_restore(badge, info);
        log::trace!("fastpath: call {} -> {}", cur, dest);
        true
    }

    /// Attempt a ReplyRecv on `cptr`. Returns `false`, having changed
    /// nothing, when the general path must handle it.
    pub fn fastpath_reply_recv(&mut self, cptr: u64, msg_info: u64) -> bool {
        let cur = self.cur_thread();
        let info = MessageInfo::from_raw(msg_info);
        if mi_check(msg_info) || !self.objects.tcb(cur).fault.is_null() {
            return false;
        }

        let Ok(Cap::Endpoint {
            object: ep, rights, ..
        }) = self.lookup_cap(cur, cptr)
        else {
            return false;
        };
        if !rights.has_read() {
            return false;
        }

        let bound = self.objects.tcb(cur).bound_notification;
        if bound.is_valid() && self.objects.notification(bound).is_active() {
            return false;
        }

        let endpoint = *self.objects.endpoint(ep);
        if endpoint.state == EndpointState::Send {
            return false;
        }

        let caller_slot = tcb_slot(cur, TcbSlot::Caller);
        let Cap::Reply {
            tcb: caller,
            master: false,
            ..
        } = self.objects.cte(caller_slot).cap
        else {
            return false;
        };

        let caller_tcb = self.objects.tcb(caller);
        if !caller_tcb.fault.is_null() {
            return false;
        }
        if !self.has_valid_vtable(caller) {
            return false;
        }
        if !self.is_highest_prio(self.fastpath_domain(), caller_tcb.priority) {
            return false;
        }
        if self.config.num_domains > 1 && caller_tcb.domain != self.cur_domain() {
            return false;
        }
        if caller_tcb.affinity != self.objects.tcb(cur).affinity {
            return false;
        }

        // Point of no return.
        self.objects.tcb_mut(cur).state = ThreadState::BlockedOnReceive {
            endpoint: ep,
            can_grant: rights.has_grant(),
        };
        let queue = ep_append(&mut self.objects, endpoint.queue, cur);
        self.objects
            .endpoint_mut(ep)
            .set_queue(queue, EndpointState::Recv);

        let caller_cte = *self.objects.cte(caller_slot);
        if let Some(master_slot) = caller_cte.mdb.prev {
            let master = &mut self.objects.cte_mut(master_slot).mdb;
            master.next = None;
            master.revocable = true;
            master.first_badged = true;
        }
        *self.objects.cte_mut(caller_slot) = sable_cap::Cte::EMPTY;

        self.fastpath_copy_mrs(info.length as usize, cur, caller);
        self.objects.tcb_mut(caller).state = ThreadState::Running;
        self.switch_to_thread(caller);
        self.fastpath_restore(Badge::NONE, info);
        log::trace!("fastpath: reply_recv {} -> {}", cur, caller);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mi_check() {
        assert!(!mi_check(MessageInfo::new(0x55, 0, 0, 4).to_word()));
        assert!(mi_check(MessageInfo::new(0, 0, 0, 5).to_word()));
        assert!(mi_check(MessageInfo::new(0, 0, 1, 0).to_word()));
        // Unwrapped bits are ignored on send.
        assert!(!mi_check(MessageInfo::new(0, 0b111, 0, 2).to_word()));
    }
}
