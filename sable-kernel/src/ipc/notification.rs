//! Notification operations.
//!
//! A notification is a word of signal bits. Signals OR their badge into
//! the word; a wait either consumes the accumulated word at once or blocks
//! until the next signal. A thread may be bound to one notification, in
//! which case a signal also wakes it from an endpoint receive.

use sable_cap::{Cap, NotificationState, ObjectRef, ThreadState, TcbQueue};

use super::queue::{ep_append, ep_dequeue, next_in_queue};
use crate::object::context::BADGE_REG;
use crate::KernelState;

impl KernelState {
    /// Signal `ntfn` with `badge`.
    pub fn send_signal(&mut self, ntfn: ObjectRef, badge: u64) {
        let notification = *self.objects.notification(ntfn);
        match notification.state {
            NotificationState::Idle => {
                let bound = notification.bound_tcb;
                if bound.is_valid()
                    && matches!(
                        self.objects.tcb(bound).state,
                        ThreadState::BlockedOnReceive { .. }
                    )
                {
                    self.cancel_ipc(bound);
                    self.set_thread_state(bound, ThreadState::Running);
                    self.objects.tcb_mut(bound).context.set(BADGE_REG, badge);
                    self.possible_switch_to(bound);
                    log::trace!("ipc: signal {} woke bound {}", ntfn, bound);
                } else {
                    self.objects.notification_mut(ntfn).accumulate(badge);
                }
            }
            NotificationState::Waiting => {
                let dest = notification.queue.head;
                assert!(dest.is_valid(), "wait queue of {ntfn} is empty");
                let queue = ep_dequeue(&mut self.objects, notification.queue, dest);
                self.objects.notification_mut(ntfn).set_waiters(queue);
                self.set_thread_state(dest, ThreadState::Running);
                self.objects.tcb_mut(dest).context.set(BADGE_REG, badge);
                self.possible_switch_to(dest);
                log::trace!("ipc: signal {} woke {}", ntfn, dest);
            }
            NotificationState::Active => {
                self.objects.notification_mut(ntfn).accumulate(badge);
            }
        }
    }

    /// Wait on the notification `cap` names.
    pub fn receive_signal(&mut self, thread: ObjectRef, cap: Cap, blocking: bool) {
        let Cap::Notification { object: ntfn, .. } = cap else {
            panic!("receive_signal on {cap}");
        };
        let notification = *self.objects.notification(ntfn);
        match notification.state {
            NotificationState::Idle | NotificationState::Waiting => {
                if !blocking {
                    self.do_nb_recv_failed_transfer(thread);
                    return;
                }
                self.set_thread_state(
                    thread,
                    ThreadState::BlockedOnNotification { notification: ntfn },
                );
                let queue = ep_append(&mut self.objects, notification.queue, thread);
                self.objects.notification_mut(ntfn).set_waiters(queue);
            }
            NotificationState::Active => {
                self.objects
                    .tcb_mut(thread)
                    .context
                    .set(BADGE_REG, notification.msg_identifier);
                self.objects.notification_mut(ntfn).state = NotificationState::Idle;
            }
        }
    }

    /// Stop `thread` waiting on `ntfn`.
    pub fn cancel_signal(&mut self, thread: ObjectRef, ntfn: ObjectRef) {
        let queue = self.objects.notification(ntfn).queue;
        let queue = ep_dequeue(&mut self.objects, queue, thread);
        self.objects.notification_mut(ntfn).set_waiters(queue);
        self.set_thread_state(thread, ThreadState::Inactive);
    }

    /// Wake every thread waiting on `ntfn` to retry its wait.
    pub fn cancel_all_signals(&mut self, ntfn: ObjectRef) {
        let notification = *self.objects.notification(ntfn);
        if notification.state != NotificationState::Waiting {
            return;
        }
        self.objects
            .notification_mut(ntfn)
            .set_waiters(TcbQueue::EMPTY);
        let mut thread = notification.queue.head;
        while thread.is_valid() {
            let next = next_in_queue(&self.objects, thread);
            self.set_thread_state(thread, ThreadState::Restart);
            self.tcb_sched_enqueue(thread);
            thread = next;
        }
        self.reschedule_required();
    }

    /// Deliver the active signal word of `ntfn` to `thread`.
    pub fn complete_signal(&mut self, ntfn: ObjectRef, thread: ObjectRef) {
        let notification = self.objects.notification_mut(ntfn);
        assert!(
            notification.is_active(),
            "completing signal of inactive {ntfn}"
        );
        notification.state = NotificationState::Idle;
        let badge = notification.msg_identifier;
        self.objects.tcb_mut(thread).context.set(BADGE_REG, badge);
    }

    pub fn bind_notification(&mut self, tcb: ObjectRef, ntfn: ObjectRef) {
        self.objects.notification_mut(ntfn).bound_tcb = tcb;
        self.objects.tcb_mut(tcb).bound_notification = ntfn;
    }

    fn do_unbind_notification(&mut self, ntfn: ObjectRef, tcb: ObjectRef) {
        self.objects.notification_mut(ntfn).bound_tcb = ObjectRef::NULL;
        self.objects.tcb_mut(tcb).bound_notification = ObjectRef::NULL;
    }

    /// Unbind `tcb` from its notification, if it has one.
    pub fn unbind_notification(&mut self, tcb: ObjectRef) {
        let ntfn = self.objects.tcb(tcb).bound_notification;
        if ntfn.is_valid() {
            self.do_unbind_notification(ntfn, tcb);
        }
    }

    /// Unbind the thread bound to `ntfn`, if there is one.
    pub fn unbind_maybe_notification(&mut self, ntfn: ObjectRef) {
        let tcb = self.objects.notification(ntfn).bound_tcb;
        if tcb.is_valid() {
            self.do_unbind_notification(ntfn, tcb);
        }
    }
}
