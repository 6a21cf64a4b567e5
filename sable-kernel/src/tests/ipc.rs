use sable_cap::{Cap, CapRights, EndpointState, NotificationState, ObjectType, SlotStore, TcbSlot, ThreadState};
use sable_syscall::{InvocationLabel, MessageInfo, Syscall, SyscallErrorKind};

use super::{cnode_op, mint};
use crate::object::context::{BADGE_REG, MSG_INFO_REG};
use crate::object::tcb::tcb_slot;
use crate::testing::TestKernel;

const OK: u64 = SyscallErrorKind::NoError.as_u64();

fn tag(t: &TestKernel, thread: sable_cap::ObjectRef) -> MessageInfo {
    MessageInfo::from_word(t.kernel.tcb(thread).context.get(MSG_INFO_REG))
}

#[test]
fn test_call_recv_reply() {
    let mut t = TestKernel::boot();
    let (ep_slot, ep) = t.create_endpoint();
    let (_, server) = t.create_thread(100);
    let root = t.root_tcb;

    t.run_as(server);
    t.ipc(Syscall::Recv, u64::from(ep_slot), 0, &[]);
    assert!(matches!(
        t.state_of(server),
        ThreadState::BlockedOnReceive { endpoint, .. } if endpoint == ep
    ));
    assert_eq!(t.kernel.cur_thread(), root);

    // Five words: the last one travels through the IPC buffers.
    t.ipc(Syscall::Call, u64::from(ep_slot), 0x42, &[1, 2, 3, 4, 5]);
    assert_eq!(t.state_of(root), ThreadState::BlockedOnReply);
    assert_eq!(t.kernel.cur_thread(), server);
    let received = tag(&t, server);
    assert_eq!((received.label, received.length), (0x42, 5));
    for i in 0..5 {
        assert_eq!(t.mr(server, i), i as u64 + 1);
    }
    assert!(matches!(
        t.kernel.objects().cte(tcb_slot(server, TcbSlot::Caller)).cap,
        Cap::Reply { tcb, master: false, .. } if tcb == root
    ));

    t.ipc(Syscall::Reply, 0, 0x99, &[7]);
    assert_eq!(t.kernel.cur_thread(), root);
    assert_eq!(t.state_of(root), ThreadState::Running);
    let reply = tag(&t, root);
    assert_eq!((reply.label, reply.length), (0x99, 1));
    assert_eq!(t.mr(root, 0), 7);
    assert!(t
        .kernel
        .objects()
        .cte(tcb_slot(server, TcbSlot::Caller))
        .is_empty());
}

#[test]
fn test_send_blocks_until_received() {
    let mut t = TestKernel::boot();
    let (ep_slot, ep) = t.create_endpoint();
    let badged = t.alloc_slots(1);
    assert_eq!(mint(&mut t, ep_slot, badged, CapRights::ALL, 0x77), OK);
    let (_, client) = t.create_thread(100);
    let root = t.root_tcb;

    t.run_as(client);
    t.ipc(Syscall::Send, u64::from(badged), 5, &[0xabc]);
    assert!(matches!(t.state_of(client), ThreadState::BlockedOnSend { .. }));
    assert_eq!(t.kernel.objects().endpoint(ep).state, EndpointState::Send);
    assert_eq!(t.kernel.cur_thread(), root);

    t.ipc(Syscall::Recv, u64::from(ep_slot), 0, &[]);
    assert_eq!(t.kernel.cur_thread(), root);
    assert_eq!(t.kernel.tcb(root).context.get(BADGE_REG), 0x77);
    assert_eq!(t.mr(root, 0), 0xabc);
    assert_eq!(tag(&t, root).label, 5);
    assert!(t.state_of(client).is_runnable());
    assert_eq!(t.kernel.objects().endpoint(ep).state, EndpointState::Idle);
}

#[test]
fn test_non_blocking_send_is_dropped() {
    let mut t = TestKernel::boot();
    let (ep_slot, ep) = t.create_endpoint();
    t.ipc(Syscall::NBSend, u64::from(ep_slot), 1, &[1]);
    assert_eq!(t.state_of(t.root_tcb), ThreadState::Running);
    assert_eq!(t.kernel.objects().endpoint(ep).state, EndpointState::Idle);
}

#[test]
fn test_non_blocking_recv_returns_empty() {
    let mut t = TestKernel::boot();
    let (ep_slot, _) = t.create_endpoint();
    t.ipc(Syscall::NBRecv, u64::from(ep_slot), 0, &[]);
    assert_eq!(t.state_of(t.root_tcb), ThreadState::Running);
    assert_eq!(t.kernel.tcb(t.root_tcb).context.get(BADGE_REG), 0);
}

#[test]
fn test_call_before_receive() {
    let mut t = TestKernel::boot();
    let (ep_slot, ep) = t.create_endpoint();
    let (_, server) = t.create_thread(100);
    let root = t.root_tcb;

    t.ipc(Syscall::Call, u64::from(ep_slot), 0x7, &[11]);
    assert!(matches!(
        t.state_of(root),
        ThreadState::BlockedOnSend { is_call: true, .. }
    ));
    assert_eq!(t.kernel.objects().endpoint(ep).state, EndpointState::Send);
    assert_eq!(t.kernel.cur_thread(), server);

    t.ipc(Syscall::Recv, u64::from(ep_slot), 0, &[]);
    assert_eq!(t.kernel.cur_thread(), server);
    assert_eq!(t.state_of(root), ThreadState::BlockedOnReply);
    assert_eq!(t.mr(server, 0), 11);
    assert_eq!(t.kernel.objects().endpoint(ep).state, EndpointState::Idle);

    t.ipc(Syscall::Reply, 0, 0, &[]);
    assert_eq!(t.state_of(root), ThreadState::Running);
    assert_eq!(t.kernel.cur_thread(), root);
    assert!(t
        .kernel
        .objects()
        .cte(tcb_slot(server, TcbSlot::Caller))
        .is_empty());
}

#[test]
fn test_cancel_badged_sends() {
    let mut t = TestKernel::boot();
    let (ep_slot, ep) = t.create_endpoint();
    let badges = t.alloc_slots(2);
    assert_eq!(mint(&mut t, ep_slot, badges, CapRights::ALL, 7), OK);
    assert_eq!(mint(&mut t, ep_slot, badges + 1, CapRights::ALL, 8), OK);

    let mut senders = [sable_cap::ObjectRef::NULL; 3];
    for (sender, slot) in senders.iter_mut().zip([badges, badges + 1, badges]) {
        let (_, thread) = t.create_thread(10);
        t.run_as(thread);
        t.ipc(Syscall::Send, u64::from(slot), 0, &[]);
        *sender = thread;
    }
    assert_eq!(t.kernel.cur_thread(), t.root_tcb);
    let [a, b, c] = senders;

    let reply = cnode_op(&mut t, InvocationLabel::CNodeCancelBadgedSends, badges);
    assert_eq!(reply, OK);
    assert_eq!(t.state_of(a), ThreadState::Restart);
    assert_eq!(t.state_of(c), ThreadState::Restart);
    assert!(t.kernel.tcb(a).queued && t.kernel.tcb(c).queued);
    assert!(matches!(t.state_of(b), ThreadState::BlockedOnSend { .. }));
    let endpoint = t.kernel.objects().endpoint(ep);
    assert_eq!(endpoint.state, EndpointState::Send);
    assert_eq!((endpoint.queue.head, endpoint.queue.tail), (b, b));

    // The unbadged original carries no badge to cancel.
    assert_eq!(
        cnode_op(&mut t, InvocationLabel::CNodeCancelBadgedSends, ep_slot),
        OK
    );
    assert!(matches!(t.state_of(b), ThreadState::BlockedOnSend { .. }));
}

#[test]
fn test_deleting_endpoint_restarts_waiters() {
    let mut t = TestKernel::boot();
    let (ep_slot, ep) = t.create_endpoint();
    let (_, waiter) = t.create_thread(10);
    t.run_as(waiter);
    t.ipc(Syscall::Recv, u64::from(ep_slot), 0, &[]);

    assert_eq!(cnode_op(&mut t, InvocationLabel::CNodeDelete, ep_slot), OK);
    assert_eq!(t.state_of(waiter), ThreadState::Restart);
    assert_eq!(t.kernel.objects().endpoint(ep).state, EndpointState::Idle);
}

#[test]
fn test_signal_then_wait() {
    let mut t = TestKernel::boot();
    let (ntfn_slot, cap) = t.create(ObjectType::Notification, 0);
    let ntfn = cap.object().expect("notification");
    let badged = t.alloc_slots(2);
    assert_eq!(mint(&mut t, ntfn_slot, badged, CapRights::ALL, 0b001), OK);
    assert_eq!(mint(&mut t, ntfn_slot, badged + 1, CapRights::ALL, 0b100), OK);

    t.ipc(Syscall::Send, u64::from(badged), 0, &[]);
    t.ipc(Syscall::Send, u64::from(badged + 1), 0, &[]);
    let notification = t.kernel.objects().notification(ntfn);
    assert_eq!(notification.state, NotificationState::Active);
    assert_eq!(notification.msg_identifier, 0b101);

    t.ipc(Syscall::NBRecv, u64::from(ntfn_slot), 0, &[]);
    assert_eq!(t.kernel.tcb(t.root_tcb).context.get(BADGE_REG), 0b101);
    assert_eq!(
        t.kernel.objects().notification(ntfn).state,
        NotificationState::Idle
    );
}

#[test]
fn test_signal_wakes_waiter() {
    let mut t = TestKernel::boot();
    let (ntfn_slot, _) = t.create(ObjectType::Notification, 0);
    let badged = t.alloc_slots(1);
    assert_eq!(mint(&mut t, ntfn_slot, badged, CapRights::ALL, 0x8), OK);
    let (_, waiter) = t.create_thread(10);

    t.run_as(waiter);
    t.ipc(Syscall::Recv, u64::from(ntfn_slot), 0, &[]);
    assert!(matches!(
        t.state_of(waiter),
        ThreadState::BlockedOnNotification { .. }
    ));

    t.ipc(Syscall::Send, u64::from(badged), 0, &[]);
    assert_eq!(t.state_of(waiter), ThreadState::Running);
    assert_eq!(t.kernel.tcb(waiter).context.get(BADGE_REG), 0x8);
}

#[test]
fn test_recv_on_missing_cap_faults() {
    let mut t = TestKernel::boot();
    let (_, thread) = t.create_thread(10);
    t.run_as(thread);
    t.ipc(Syscall::Recv, 0x7ff, 0, &[]);
    // No fault handler either.
    assert_eq!(t.state_of(thread), ThreadState::Inactive);
    assert_eq!(t.kernel.cur_thread(), t.root_tcb);
}

#[test]
fn test_invoking_missing_cap_faults_only_when_blocking() {
    let mut t = TestKernel::boot();
    let (_, thread) = t.create_thread(10);
    t.run_as(thread);

    t.ipc(Syscall::NBSend, 0x7ff, 0, &[]);
    assert_eq!(t.state_of(thread), ThreadState::Running);
    assert_eq!(t.kernel.cur_thread(), thread);

    t.ipc(Syscall::Call, 0x7ff, 0, &[]);
    assert_eq!(t.state_of(thread), ThreadState::Inactive);
    assert_eq!(t.kernel.cur_thread(), t.root_tcb);
}
