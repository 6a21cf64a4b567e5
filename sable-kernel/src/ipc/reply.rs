//! Reply capabilities
//!
//! A Call leaves the caller BlockedOnReply and gives the receiver a
//! one-shot reply capability in its Caller slot, derived from the caller's
//! master reply capability. Replying consumes it; so does cancelling the
//! caller's IPC, which deletes the child of the master.

use sable_cap::{Cap, CdtOps, ObjectRef, SlotRef, SlotStore, TcbSlot, ThreadState};

use crate::fault::Fault;
use crate::object::tcb::tcb_slot;
use crate::KernelState;

impl KernelState {
    /// Block `sender` on its reply and hand `receiver` the right to give it.
    pub fn setup_caller_cap(&mut self, sender: ObjectRef, receiver: ObjectRef, can_grant: bool) {
        self.set_thread_state(sender, ThreadState::BlockedOnReply);
        let reply_slot = tcb_slot(sender, TcbSlot::Reply);
        assert!(
            matches!(
                self.objects.cte(reply_slot).cap,
                Cap::Reply { master: true, .. }
            ),
            "{sender} has no master reply cap"
        );
        let caller_slot = tcb_slot(receiver, TcbSlot::Caller);
        assert!(
            self.objects.cte(caller_slot).is_empty(),
            "caller slot of {receiver} is occupied"
        );
        self.objects.cte_insert(
            Cap::Reply {
                tcb: sender,
                master: false,
                can_grant,
            },
            reply_slot,
            caller_slot,
        );
    }

    /// Drop any reply capability `receiver` holds.
    pub fn delete_caller_cap(&mut self, receiver: ObjectRef) {
        self.cte_delete_one(tcb_slot(receiver, TcbSlot::Caller));
    }

    /// Reply from `sender` to `receiver`, consuming the reply cap in `slot`.
    pub fn do_reply_transfer(
        &mut self,
        sender: ObjectRef,
        receiver: ObjectRef,
        slot: SlotRef,
        can_grant: bool,
    ) {
        assert_eq!(
            self.objects.tcb(receiver).state,
            ThreadState::BlockedOnReply,
            "reply to {receiver} which is not waiting for one"
        );

        if self.objects.tcb(receiver).fault.is_null() {
            self.do_ipc_transfer(sender, None, sable_cap::Badge::NONE, can_grant, receiver);
            self.cte_delete_one(slot);
            self.set_thread_state(receiver, ThreadState::Running);
            self.possible_switch_to(receiver);
        } else {
            self.cte_delete_one(slot);
            let restart = self.handle_fault_reply(receiver, sender);
            self.objects.tcb_mut(receiver).fault = Fault::Null;
            if restart {
                self.set_thread_state(receiver, ThreadState::Restart);
                self.possible_switch_to(receiver);
            } else {
                self.set_thread_state(receiver, ThreadState::Inactive);
            }
        }
        log::trace!("ipc: {} replied to {}", sender, receiver);
    }

    /// The Reply syscall: answer whoever the current thread's caller slot
    /// names, if anyone.
    pub fn handle_reply(&mut self) {
        let cur = self.cur_thread();
        let caller_slot = tcb_slot(cur, TcbSlot::Caller);
        match self.objects.cte(caller_slot).cap {
            Cap::Reply { master: true, .. } | Cap::Null => {}
            Cap::Reply {
                tcb, can_grant, ..
            } => {
                assert!(tcb != cur, "{cur} replying to itself");
                self.do_reply_transfer(cur, tcb, caller_slot, can_grant);
            }
            other => panic!("caller slot of {cur} holds {other}"),
        }
    }
}
