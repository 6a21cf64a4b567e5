//! Thread lifecycle control
//!
//! Suspend/resume, scheduling parameter changes and migration between
//! cores. These are the operations behind the TCB invocations, and the
//! ones deletion uses to stop a thread before its TCB becomes a Zombie.

use sable_cap::{Cap, Cte, MdbNode, ObjectRef, SlotStore, TcbSlot, ThreadState};

use crate::machine::Ipi;
use crate::object::tcb::tcb_slot;
use crate::{KernelState, SchedulerAction};

impl KernelState {
    /// Stop a thread, abandoning any IPC it is blocked in.
    pub fn suspend(&mut self, t: ObjectRef) {
        self.cancel_ipc(t);
        if self.objects.tcb(t).state == ThreadState::Running {
            // Resume after the syscall, not in it.
            self.objects.tcb_mut(t).context.commit_next_ip();
        }
        self.set_thread_state(t, ThreadState::Inactive);
        self.tcb_sched_dequeue(t);
    }

    /// Resume a stopped thread at its restart point.
    pub fn restart(&mut self, t: ObjectRef) {
        if self.objects.tcb(t).state.is_stopped() {
            self.cancel_ipc(t);
            self.setup_reply_master(t);
            self.set_thread_state(t, ThreadState::Restart);
            self.tcb_sched_enqueue(t);
            self.possible_switch_to(t);
        }
    }

    /// Install the master reply capability every thread keeps in its
    /// reply slot.
    pub fn setup_reply_master(&mut self, t: ObjectRef) {
        let slot = tcb_slot(t, TcbSlot::Reply);
        if self.objects.cte(slot).is_empty() {
            *self.objects.cte_mut(slot) = Cte {
                cap: Cap::Reply {
                    tcb: t,
                    master: true,
                    can_grant: true,
                },
                mdb: MdbNode {
                    revocable: true,
                    first_badged: true,
                    ..MdbNode::NULL
                },
            };
        }
    }

    pub fn set_priority(&mut self, t: ObjectRef, priority: u8) {
        self.tcb_sched_dequeue(t);
        self.objects.tcb_mut(t).priority = priority;
        if self.objects.tcb(t).is_runnable() {
            if t == self.cur_thread() {
                self.reschedule_required();
            } else {
                self.possible_switch_to(t);
            }
        }
    }

    pub fn set_mcp(&mut self, t: ObjectRef, mcp: u8) {
        self.objects.tcb_mut(t).mcp = mcp;
    }

    /// Move a thread into another scheduling domain.
    pub fn set_domain(&mut self, t: ObjectRef, domain: u8) {
        self.tcb_sched_dequeue(t);
        self.objects.tcb_mut(t).domain = domain;
        if self.objects.tcb(t).is_runnable() {
            self.tcb_sched_enqueue(t);
        }
        if t == self.cur_thread() {
            self.reschedule_required();
        }
    }

    /// Migrate a thread to `core`.
    pub fn set_affinity(&mut self, t: ObjectRef, core: usize) {
        self.tcb_sched_dequeue(t);
        log::debug!("sched: migrate {} to core {}", t, core);
        self.objects.tcb_mut(t).affinity = core;
        if self.objects.tcb(t).is_runnable() {
            self.tcb_sched_append(t);
        }
        if t == self.cur_thread() {
            self.reschedule_required();
        }
    }

    /// If `t` is running on another core, stall that core on its idle
    /// thread so `t` can be modified.
    pub fn remote_tcb_stall(&mut self, t: ObjectRef) {
        let core = self.objects.tcb(t).affinity;
        if core == self.current_node || self.nodes[core].cur_thread != t {
            return;
        }
        log::trace!("sched: stall core {} running {}", core, t);
        if self.objects.tcb(t).is_runnable() {
            self.tcb_sched_enqueue(t);
        }
        let node = &mut self.nodes[core];
        node.cur_thread = node.idle_thread;
        node.action = SchedulerAction::ResumeCurrentThread;
        self.machine.send_ipi(1 << core, Ipi::Stall);
    }

    /// Give up the rest of the current time slice.
    pub fn handle_yield(&mut self) {
        let cur = self.cur_thread();
        self.tcb_sched_dequeue(cur);
        self.tcb_sched_append(cur);
        self.reschedule_required();
    }
}
