//! Priority scheduler
//!
//! Strict fixed-priority round robin within scheduling domains.
//!
//! # Key Concepts
//!
//! - **Ready queues**: one FIFO per `(domain, priority)` on every core. A
//!   thread is in one when it is runnable, except while it is the current
//!   thread of its core.
//! - **Scheduler action**: the decision of what runs next is deferred and
//!   resolved once per kernel exit by [`KernelState::schedule`]. IPC wakeups
//!   nominate a candidate with [`KernelState::possible_switch_to`]; anything
//!   that invalidates the current choice calls
//!   [`KernelState::reschedule_required`].
//! - **Domains**: only threads of the current domain run. The domain
//!   schedule advances when its budget expires, checked on the next
//!   choose-new-thread decision.
//! - **Remote cores**: enqueueing onto another core's queue records an IPI
//!   in `ipi_mask`, flushed by [`KernelState::flush_remote_ipis`].

use sable_cap::{ObjectRef, SlotStore, TcbSlot, ThreadState};

use crate::machine::Ipi;
use crate::object::tcb::tcb_slot;
use crate::{KernelState, SchedulerAction};

mod domain;
mod ready_queue;
pub mod thread;

pub use domain::DomainState;
pub use ready_queue::ReadyQueues;

// -- Ready queue membership

impl KernelState {
    /// Insert `t` at the head of its ready queue.
    pub fn tcb_sched_enqueue(&mut self, t: ObjectRef) {
        let tcb = self.objects.tcb(t);
        if tcb.queued {
            return;
        }
        let (dom, prio, core) = (tcb.domain, tcb.priority, tcb.affinity);
        let mut queue = self.nodes[core].ready_queues.queue(dom, prio);
        if queue.is_empty() {
            queue.tail = t;
        } else {
            self.objects.tcb_mut(queue.head).sched_prev = t;
        }
        let tcb = self.objects.tcb_mut(t);
        tcb.sched_prev = ObjectRef::NULL;
        tcb.sched_next = queue.head;
        tcb.queued = true;
        queue.head = t;
        self.nodes[core].ready_queues.set_queue(dom, prio, queue);
        self.remote_queue_update(t);
    }

    /// Insert `t` at the tail of its ready queue.
    pub fn tcb_sched_append(&mut self, t: ObjectRef) {
        let tcb = self.objects.tcb(t);
        if tcb.queued {
            return;
        }
        let (dom, prio, core) = (tcb.domain, tcb.priority, tcb.affinity);
        let mut queue = self.nodes[core].ready_queues.queue(dom, prio);
        if queue.is_empty() {
            queue.head = t;
        } else {
            self.objects.tcb_mut(queue.tail).sched_next = t;
        }
        let tcb = self.objects.tcb_mut(t);
        tcb.sched_prev = queue.tail;
        tcb.sched_next = ObjectRef::NULL;
        tcb.queued = true;
        queue.tail = t;
        self.nodes[core].ready_queues.set_queue(dom, prio, queue);
        self.remote_queue_update(t);
    }

    /// Remove `t` from its ready queue, if it is in one.
    pub fn tcb_sched_dequeue(&mut self, t: ObjectRef) {
        let tcb = self.objects.tcb(t);
        if !tcb.queued {
            return;
        }
        let (dom, prio, core) = (tcb.domain, tcb.priority, tcb.affinity);
        let (prev, next) = (tcb.sched_prev, tcb.sched_next);
        let mut queue = self.nodes[core].ready_queues.queue(dom, prio);
        if prev.is_null() {
            queue.head = next;
        } else {
            self.objects.tcb_mut(prev).sched_next = next;
        }
        if next.is_null() {
            queue.tail = prev;
        } else {
            self.objects.tcb_mut(next).sched_prev = prev;
        }
        let tcb = self.objects.tcb_mut(t);
        tcb.sched_prev = ObjectRef::NULL;
        tcb.sched_next = ObjectRef::NULL;
        tcb.queued = false;
        self.nodes[core].ready_queues.set_queue(dom, prio, queue);
    }

    /// Note that another core must reschedule if `t` landed on its queue
    /// and could preempt what it is running.
    fn remote_queue_update(&mut self, t: ObjectRef) {
        let tcb = self.objects.tcb(t);
        let core = tcb.affinity;
        if core == self.current_node {
            return;
        }
        let node = &self.nodes[core];
        let target = self.objects.tcb(node.cur_thread);
        if node.cur_thread == node.idle_thread || tcb.priority > target.priority {
            self.ipi_mask |= 1 << core;
        }
    }

    /// Send the reschedule IPIs owed by this kernel entry.
    pub fn flush_remote_ipis(&mut self) {
        let mask = core::mem::take(&mut self.ipi_mask);
        if mask != 0 {
            log::trace!("sched: reschedule ipi to {:#x}", mask);
            self.machine.send_ipi(mask, Ipi::Reschedule);
        }
    }

    /// Whether `prio` is at least the highest ready priority of `dom` on
    /// the current core.
    pub(crate) fn is_highest_prio(&self, dom: u8, prio: u8) -> bool {
        self.nodes[self.current_node]
            .ready_queues
            .highest_priority(dom)
            .map_or(true, |highest| prio >= highest)
    }
}

// -- Deferred scheduling decisions

impl KernelState {
    /// Change a thread's state and fix up the scheduler if the current
    /// thread stopped being runnable.
    pub fn set_thread_state(&mut self, t: ObjectRef, state: ThreadState) {
        log::trace!(
            "sched: {} {} -> {}",
            t,
            self.objects.tcb(t).state.name(),
            state.name()
        );
        self.objects.tcb_mut(t).state = state;
        self.schedule_tcb(t);
    }

    fn schedule_tcb(&mut self, t: ObjectRef) {
        if t == self.cur_thread()
            && self.action() == SchedulerAction::ResumeCurrentThread
            && !self.objects.tcb(t).is_runnable()
        {
            self.reschedule_required();
        }
    }

    /// Abandon any pending switch and choose afresh at kernel exit.
    pub fn reschedule_required(&mut self) {
        if let SchedulerAction::SwitchToThread(candidate) = self.action() {
            self.tcb_sched_enqueue(candidate);
        }
        self.set_action(SchedulerAction::ChooseNewThread);
    }

    /// Nominate a newly runnable thread to run next.
    pub fn possible_switch_to(&mut self, target: ObjectRef) {
        let tcb = self.objects.tcb(target);
        if tcb.domain != self.cur_domain() || tcb.affinity != self.current_node {
            self.tcb_sched_enqueue(target);
        } else if self.action() != SchedulerAction::ResumeCurrentThread {
            self.reschedule_required();
            self.tcb_sched_enqueue(target);
        } else {
            self.set_action(SchedulerAction::SwitchToThread(target));
        }
    }

    /// Resolve the scheduler action.
    pub fn schedule(&mut self) {
        let action = self.action();
        if action != SchedulerAction::ResumeCurrentThread {
            let cur = self.cur_thread();
            let was_runnable = self.objects.tcb(cur).is_runnable();
            if was_runnable {
                self.tcb_sched_enqueue(cur);
            }

            match action {
                SchedulerAction::SwitchToThread(candidate) => {
                    let cand_prio = self.objects.tcb(candidate).priority;
                    let cur_prio = self.objects.tcb(cur).priority;
                    let fastfail = cur == self.idle_thread() || cand_prio < cur_prio;
                    if fastfail && !self.is_highest_prio(self.cur_domain(), cand_prio) {
                        self.tcb_sched_enqueue(candidate);
                        self.set_action(SchedulerAction::ChooseNewThread);
                        self.schedule_choose_new_thread();
                    } else if was_runnable && cand_prio == cur_prio {
                        self.tcb_sched_append(candidate);
                        self.set_action(SchedulerAction::ChooseNewThread);
                        self.schedule_choose_new_thread();
                    } else {
                        self.switch_to_thread(candidate);
                    }
                }
                _ => self.schedule_choose_new_thread(),
            }
        }
        self.set_action(SchedulerAction::ResumeCurrentThread);
    }

    fn schedule_choose_new_thread(&mut self) {
        if self.domain.time_left == 0 {
            self.next_domain();
        }
        self.choose_thread();
    }

    fn next_domain(&mut self) {
        self.domain.advance();
        self.work_units = 0;
        log::trace!("sched: domain {} for {} ticks", self.domain.current, self.domain.time_left);
    }

    fn choose_thread(&mut self) {
        let dom = if self.config.num_domains > 1 {
            self.cur_domain()
        } else {
            0
        };
        let node = &self.nodes[self.current_node];
        match node.ready_queues.highest_priority(dom) {
            Some(prio) => {
                let thread = node.ready_queues.queue(dom, prio).head;
                assert!(
                    self.objects.tcb(thread).is_runnable(),
                    "non-runnable thread {thread} in ready queue"
                );
                self.switch_to_thread(thread);
            }
            None => self.switch_to_idle_thread(),
        }
    }

    /// Make `t` the current thread.
    pub fn switch_to_thread(&mut self, t: ObjectRef) {
        let root = match self.objects.cte(tcb_slot(t, TcbSlot::VTable)).cap {
            sable_cap::Cap::PageTable {
                base,
                is_root: true,
                ..
            } => Some(base),
            _ => None,
        };
        self.machine.set_vspace_root(root);
        self.tcb_sched_dequeue(t);
        self.nodes[self.current_node].cur_thread = t;
    }

    pub fn switch_to_idle_thread(&mut self) {
        self.machine.set_vspace_root(None);
        let idle = self.idle_thread();
        self.nodes[self.current_node].cur_thread = idle;
    }

    /// Prepare the current thread to return to user mode.
    pub fn activate_thread(&mut self) {
        let cur = self.cur_thread();
        match self.objects.tcb(cur).state {
            ThreadState::Running | ThreadState::Idle => {}
            ThreadState::Restart => {
                self.objects.tcb_mut(cur).context.rewind();
                self.set_thread_state(cur, ThreadState::Running);
            }
            other => panic!("activating {cur} in state {}", other.name()),
        }
    }

    /// Account one timer tick to the current thread and domain.
    pub fn timer_tick(&mut self) {
        let cur = self.cur_thread();
        if self.objects.tcb(cur).state == ThreadState::Running {
            let time_slice = self.config.time_slice;
            let tcb = self.objects.tcb_mut(cur);
            if tcb.time_slice > 1 {
                tcb.time_slice -= 1;
            } else {
                tcb.time_slice = time_slice;
                self.tcb_sched_append(cur);
                self.reschedule_required();
            }
        }
        if self.config.num_domains > 1 {
            self.domain.time_left = self.domain.time_left.saturating_sub(1);
            if self.domain.time_left == 0 {
                self.reschedule_required();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use sable_cap::ThreadState;

    use crate::object::{KernelObject, Tcb};
    use crate::testing::MockMachine;
    use crate::{KernelState, SchedulerAction};
    use crate::config::KernelConfig;

    fn kernel() -> KernelState {
        KernelState::new(KernelConfig::default(), Box::new(MockMachine::new()))
            .expect("valid config")
    }

    fn thread(k: &mut KernelState, prio: u8) -> sable_cap::ObjectRef {
        let mut tcb = Tcb::new(0, 5, 0);
        tcb.priority = prio;
        tcb.state = ThreadState::Running;
        k.objects
            .insert(None, KernelObject::Tcb(Box::new(tcb)))
            .expect("table space")
    }

    #[test]
    fn test_enqueue_head_append_tail() {
        let mut k = kernel();
        let a = thread(&mut k, 10);
        let b = thread(&mut k, 10);
        let c = thread(&mut k, 10);
        k.tcb_sched_append(a);
        k.tcb_sched_append(b);
        k.tcb_sched_enqueue(c);
        let q = k.nodes[0].ready_queues.queue(0, 10);
        assert_eq!((q.head, q.tail), (c, b));
        k.tcb_sched_dequeue(a);
        assert_eq!(k.objects.tcb(c).sched_next, b);
        assert_eq!(k.objects.tcb(b).sched_prev, c);
        assert!(!k.objects.tcb(a).queued);
    }

    #[test]
    fn test_highest_priority_runs() {
        let mut k = kernel();
        let low = thread(&mut k, 3);
        let high = thread(&mut k, 200);
        k.tcb_sched_append(low);
        k.tcb_sched_append(high);
        k.reschedule_required();
        k.schedule();
        assert_eq!(k.cur_thread(), high);
        assert!(!k.objects.tcb(high).queued);
        assert!(k.objects.tcb(low).queued);
        assert_eq!(k.action(), SchedulerAction::ResumeCurrentThread);
    }

    #[test]
    fn test_lower_priority_candidate_is_queued() {
        let mut k = kernel();
        let high = thread(&mut k, 200);
        let low = thread(&mut k, 3);
        k.switch_to_thread(high);
        k.possible_switch_to(low);
        k.schedule();
        assert_eq!(k.cur_thread(), high);
        assert!(k.objects.tcb(low).queued);
    }

    #[test]
    fn test_equal_priority_candidate_goes_behind() {
        let mut k = kernel();
        let cur = thread(&mut k, 50);
        let other = thread(&mut k, 50);
        k.switch_to_thread(cur);
        k.possible_switch_to(other);
        k.schedule();
        // The current thread was enqueued at the head, the candidate appended.
        assert_eq!(k.cur_thread(), cur);
        assert!(k.objects.tcb(other).queued);
    }

    #[test]
    fn test_timer_tick_round_robin() {
        let mut k = kernel();
        let a = thread(&mut k, 7);
        let b = thread(&mut k, 7);
        k.switch_to_thread(a);
        k.tcb_sched_append(b);
        k.objects.tcb_mut(a).time_slice = 1;
        k.timer_tick();
        k.schedule();
        assert_eq!(k.cur_thread(), b);
        assert_eq!(k.objects.tcb(a).time_slice, k.config.time_slice);
        assert!(k.objects.tcb(a).queued);
    }

    #[test]
    fn test_idle_when_nothing_ready() {
        let mut k = kernel();
        let a = thread(&mut k, 7);
        k.switch_to_thread(a);
        k.set_thread_state(a, ThreadState::Inactive);
        assert_eq!(k.action(), SchedulerAction::ChooseNewThread);
        k.schedule();
        assert_eq!(k.cur_thread(), k.idle_thread());
    }

    #[test]
    fn test_restart_rewinds_on_activation() {
        let mut k = kernel();
        let a = thread(&mut k, 7);
        k.switch_to_thread(a);
        let ctx = &mut k.objects.tcb_mut(a).context;
        ctx.set(crate::object::context::FAULT_IP, 0x4000);
        ctx.set(crate::object::context::NEXT_IP, 0x4004);
        k.objects.tcb_mut(a).state = ThreadState::Restart;
        k.activate_thread();
        let tcb = k.objects.tcb(a);
        assert_eq!(tcb.state, ThreadState::Running);
        assert_eq!(tcb.context.get(crate::object::context::NEXT_IP), 0x4000);
    }
}
