//! Endpoint IPC operations.
//!
//! Synchronous rendezvous: a sender and a receiver meet at an endpoint and
//! the message is copied directly between them. Whichever side arrives
//! first waits in the endpoint queue; the queue holds only senders or only
//! receivers, recorded in the endpoint state.
//!
//! - Send/Call: [`KernelState::send_ipc`]
//! - Recv: [`KernelState::receive_ipc`]
//! - Cancellation: [`KernelState::cancel_ipc`],
//!   [`KernelState::cancel_all_ipc`], [`KernelState::cancel_badged_sends`]

use sable_cap::{Badge, Cap, EndpointState, ObjectRef, SlotStore, TcbQueue, TcbSlot, ThreadState};

use super::queue::{ep_append, ep_dequeue, next_in_queue};
use crate::fault::Fault;
use crate::object::tcb::tcb_slot;
use crate::KernelState;

impl KernelState {
    /// Send on endpoint `ep` on behalf of `thread`.
    ///
    /// A non-blocking send with no waiting receiver is dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn send_ipc(
        &mut self,
        blocking: bool,
        is_call: bool,
        badge: Badge,
        can_grant: bool,
        can_grant_reply: bool,
        thread: ObjectRef,
        ep: ObjectRef,
    ) {
        let endpoint = *self.objects.endpoint(ep);
        match endpoint.state {
            EndpointState::Idle | EndpointState::Send => {
                if !blocking {
                    log::trace!("ipc: {} nbsend to {} dropped", thread, ep);
                    return;
                }
                self.set_thread_state(
                    thread,
                    ThreadState::BlockedOnSend {
                        endpoint: ep,
                        badge,
                        can_grant,
                        can_grant_reply,
                        is_call,
                    },
                );
                let queue = ep_append(&mut self.objects, endpoint.queue, thread);
                self.objects
                    .endpoint_mut(ep)
                    .set_queue(queue, EndpointState::Send);
                log::trace!("ipc: {} blocked sending on {}", thread, ep);
            }
            EndpointState::Recv => {
                let dest = endpoint.queue.head;
                assert!(dest.is_valid(), "receive queue of {ep} is empty");
                let queue = ep_dequeue(&mut self.objects, endpoint.queue, dest);
                self.objects
                    .endpoint_mut(ep)
                    .set_queue(queue, EndpointState::Recv);

                self.do_ipc_transfer(thread, Some(ep), badge, can_grant, dest);

                let reply_can_grant = match self.objects.tcb(dest).state {
                    ThreadState::BlockedOnReceive { can_grant, .. } => can_grant,
                    _ => false,
                };
                self.set_thread_state(dest, ThreadState::Running);
                self.possible_switch_to(dest);
                log::trace!("ipc: {} -> {} via {}", thread, dest, ep);

                if is_call {
                    if can_grant || can_grant_reply {
                        self.setup_caller_cap(thread, dest, reply_can_grant);
                    } else {
                        self.set_thread_state(thread, ThreadState::Inactive);
                    }
                }
            }
        }
    }

    /// Receive on the endpoint `cap` names on behalf of `thread`.
    ///
    /// A pending signal on the thread's bound notification is delivered
    /// instead of waiting on the endpoint.
    pub fn receive_ipc(&mut self, thread: ObjectRef, cap: Cap, blocking: bool) {
        let Cap::Endpoint {
            object: ep, rights, ..
        } = cap
        else {
            panic!("receive_ipc on {cap}");
        };

        let bound = self.objects.tcb(thread).bound_notification;
        if bound.is_valid() && self.objects.notification(bound).is_active() {
            self.complete_signal(bound, thread);
            return;
        }

        let endpoint = *self.objects.endpoint(ep);
        match endpoint.state {
            EndpointState::Idle | EndpointState::Recv => {
                if !blocking {
                    self.do_nb_recv_failed_transfer(thread);
                    return;
                }
                self.set_thread_state(
                    thread,
                    ThreadState::BlockedOnReceive {
                        endpoint: ep,
                        can_grant: rights.has_grant(),
                    },
                );
                let queue = ep_append(&mut self.objects, endpoint.queue, thread);
                self.objects
                    .endpoint_mut(ep)
                    .set_queue(queue, EndpointState::Recv);
                log::trace!("ipc: {} blocked receiving on {}", thread, ep);
            }
            EndpointState::Send => {
                let sender = endpoint.queue.head;
                assert!(sender.is_valid(), "send queue of {ep} is empty");
                let queue = ep_dequeue(&mut self.objects, endpoint.queue, sender);
                self.objects
                    .endpoint_mut(ep)
                    .set_queue(queue, EndpointState::Send);

                let ThreadState::BlockedOnSend {
                    badge,
                    can_grant,
                    can_grant_reply,
                    is_call,
                    ..
                } = self.objects.tcb(sender).state
                else {
                    panic!("{sender} queued on {ep} but not sending");
                };

                self.do_ipc_transfer(sender, Some(ep), badge, can_grant, thread);
                log::trace!("ipc: {} -> {} via {}", sender, thread, ep);

                if is_call {
                    if can_grant || can_grant_reply {
                        self.setup_caller_cap(sender, thread, rights.has_grant());
                    } else {
                        self.set_thread_state(sender, ThreadState::Inactive);
                    }
                } else {
                    self.set_thread_state(sender, ThreadState::Running);
                    self.possible_switch_to(sender);
                }
            }
        }
    }

    /// Abort whatever IPC `t` is blocked in.
    pub fn cancel_ipc(&mut self, t: ObjectRef) {
        match self.objects.tcb(t).state {
            ThreadState::BlockedOnSend { endpoint, .. }
            | ThreadState::BlockedOnReceive { endpoint, .. } => {
                let ep = *self.objects.endpoint(endpoint);
                assert!(ep.state != EndpointState::Idle, "{t} blocked on idle {endpoint}");
                let queue = ep_dequeue(&mut self.objects, ep.queue, t);
                self.objects.endpoint_mut(endpoint).set_queue(queue, ep.state);
                self.set_thread_state(t, ThreadState::Inactive);
            }
            ThreadState::BlockedOnNotification { notification } => {
                self.cancel_signal(t, notification);
            }
            ThreadState::BlockedOnReply => {
                self.objects.tcb_mut(t).fault = Fault::Null;
                if let Some(caller) = self.objects.cte(tcb_slot(t, TcbSlot::Reply)).mdb.next {
                    self.cte_delete_one(caller);
                }
            }
            _ => {}
        }
    }

    /// Wake every thread waiting on `ep` to retry its operation.
    pub fn cancel_all_ipc(&mut self, ep: ObjectRef) {
        let endpoint = *self.objects.endpoint(ep);
        if endpoint.state == EndpointState::Idle {
            return;
        }
        self.objects
            .endpoint_mut(ep)
            .set_queue(TcbQueue::EMPTY, EndpointState::Idle);

        let mut thread = endpoint.queue.head;
        while thread.is_valid() {
            let next = next_in_queue(&self.objects, thread);
            self.set_thread_state(thread, ThreadState::Restart);
            self.tcb_sched_enqueue(thread);
            thread = next;
        }
        log::debug!("ipc: cancelled all ipc on {}", ep);
        self.reschedule_required();
    }

    /// Wake the senders queued on `ep` with `badge`, leaving the others.
    pub fn cancel_badged_sends(&mut self, ep: ObjectRef, badge: Badge) {
        let endpoint = *self.objects.endpoint(ep);
        if endpoint.state != EndpointState::Send {
            return;
        }
        self.objects
            .endpoint_mut(ep)
            .set_queue(TcbQueue::EMPTY, EndpointState::Idle);

        let mut queue = endpoint.queue;
        let mut thread = queue.head;
        while thread.is_valid() {
            let next = next_in_queue(&self.objects, thread);
            let sent_badge = match self.objects.tcb(thread).state {
                ThreadState::BlockedOnSend { badge, .. } => badge,
                other => panic!("{thread} in send queue of {ep} is {}", other.name()),
            };
            if sent_badge == badge {
                self.set_thread_state(thread, ThreadState::Restart);
                self.tcb_sched_enqueue(thread);
                queue = ep_dequeue(&mut self.objects, queue, thread);
            }
            thread = next;
        }
        self.objects
            .endpoint_mut(ep)
            .set_queue(queue, EndpointState::Send);
        log::debug!("ipc: cancelled sends badged {} on {}", badge, ep);
        self.reschedule_required();
    }
}
