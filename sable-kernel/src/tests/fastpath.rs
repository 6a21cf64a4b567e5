//! The fast path must leave the kernel exactly where the general path
//! would. Each scenario runs twice, once per configuration, and the
//! observable state is compared.

use alloc::vec::Vec;

use sable_cap::{CapRights, EndpointObject, EndpointState, ObjectRef, ThreadState};
use sable_syscall::{MessageInfo, Syscall, SyscallErrorKind};

use super::mint;
use crate::config::KernelConfig;
use crate::object::context::{BADGE_REG, MSG_INFO_REG};
use crate::object::Tcb;
use crate::sched::ReadyQueues;
use crate::testing::TestKernel;

/// Index of the root thread in [`Snapshot::threads`].
const ROOT: usize = 0;
/// Index of the first server.
const SERVER: usize = 1;

#[derive(Clone, Copy, Debug)]
struct Shape {
    /// Badge on the root thread's endpoint capability.
    badge: Option<u64>,
    server_priority: u8,
    /// Servers waiting on the endpoint before the call.
    servers: usize,
    /// A thread of the server's priority that sends while the first
    /// server handles the call.
    sender: bool,
}

const PLAIN: Shape = Shape {
    badge: Some(0x33),
    server_priority: 255,
    servers: 1,
    sender: false,
};

#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    cur: ObjectRef,
    /// Root thread, the servers, then the sender.
    threads: Vec<Tcb>,
    endpoint: EndpointObject,
    ready_queues: ReadyQueues,
}

struct Rpc {
    t: TestKernel,
    ep: ObjectRef,
    ep_slot: u32,
    /// What the root thread calls through.
    cptr: u32,
    servers: Vec<ObjectRef>,
    sender: Option<ObjectRef>,
}

impl Rpc {
    /// Servers waiting on an endpoint the root thread holds a capability
    /// to, with the root thread running.
    fn new(fastpath: bool, shape: Shape) -> Self {
        let mut t = TestKernel::boot_with(KernelConfig {
            fastpath,
            ..KernelConfig::default()
        });
        let (ep_slot, ep) = t.create_endpoint();
        let cptr = match shape.badge {
            Some(badge) => {
                let slot = t.alloc_slots(1);
                assert_eq!(
                    mint(&mut t, ep_slot, slot, CapRights::ALL, badge),
                    SyscallErrorKind::NoError.as_u64()
                );
                slot
            }
            None => ep_slot,
        };
        let servers: Vec<_> = (0..shape.servers)
            .map(|_| t.create_thread(shape.server_priority).1)
            .collect();
        let sender = shape
            .sender
            .then(|| t.create_thread(shape.server_priority).1);
        for &server in &servers {
            t.run_as(server);
            t.ipc(Syscall::Recv, u64::from(ep_slot), 0, &[]);
        }
        t.run_as(t.root_tcb);
        assert_eq!(t.kernel.objects().endpoint(ep).state, EndpointState::Recv);
        Self {
            t,
            ep,
            ep_slot,
            cptr,
            servers,
            sender,
        }
    }

    fn snapshot(&self) -> Snapshot {
        let t = &self.t;
        let threads = [t.root_tcb]
            .iter()
            .chain(&self.servers)
            .chain(&self.sender)
            .map(|&thread| t.kernel.tcb(thread).clone())
            .collect();
        Snapshot {
            cur: t.kernel.cur_thread(),
            threads,
            endpoint: *t.kernel.objects().endpoint(self.ep),
            ready_queues: t.kernel.node(0).ready_queues.clone(),
        }
    }

    fn call(&mut self) {
        self.t
            .ipc(Syscall::Call, u64::from(self.cptr), 0x21, &[10, 20, 30]);
    }

    fn reply_recv(&mut self) {
        self.t
            .ipc(Syscall::ReplyRecv, u64::from(self.ep_slot), 0x12, &[40, 50]);
    }

    /// Let the sender queue a message while the first server is busy.
    fn send_from_sender(&mut self) {
        let server = self.servers[0];
        let Some(sender) = self.sender else {
            panic!("shape has no sender");
        };
        self.t.run_as(sender);
        self.t.ipc(Syscall::Send, u64::from(self.cptr), 0x44, &[77]);
        assert_eq!(self.t.kernel.cur_thread(), server);
    }
}

/// Run `steps` with and without the fast path and check both end alike.
fn compare(shape: Shape, steps: impl Fn(&mut Rpc)) -> (Rpc, Snapshot) {
    let mut fast = Rpc::new(true, shape);
    let mut slow = Rpc::new(false, shape);
    steps(&mut fast);
    steps(&mut slow);
    let snapshot = fast.snapshot();
    assert_eq!(snapshot, slow.snapshot(), "{shape:?}");
    (fast, snapshot)
}

fn check_call(rpc: &Rpc, snapshot: &Snapshot, badge: u64) {
    let server = &snapshot.threads[SERVER];
    assert_eq!(snapshot.cur, rpc.servers[0]);
    assert_eq!(snapshot.threads[ROOT].state, ThreadState::BlockedOnReply);
    assert_eq!(server.state, ThreadState::Running);
    let info = MessageInfo::from_word(server.context.get(MSG_INFO_REG));
    assert_eq!((info.label, info.length), (0x21, 3));
    assert_eq!(server.context.get(BADGE_REG), badge);
    for (i, value) in [10, 20, 30].into_iter().enumerate() {
        assert_eq!(rpc.t.mr(rpc.servers[0], i), value);
    }
}

#[test]
fn test_call_matches_general_path() {
    let (rpc, snapshot) = compare(PLAIN, Rpc::call);
    check_call(&rpc, &snapshot, 0x33);
    assert_eq!(snapshot.endpoint, EndpointObject::new());
}

#[test]
fn test_call_on_unbadged_endpoint() {
    let shape = Shape {
        badge: None,
        ..PLAIN
    };
    let (rpc, snapshot) = compare(shape, Rpc::call);
    check_call(&rpc, &snapshot, 0);
}

#[test]
fn test_call_leaves_other_servers_queued() {
    let shape = Shape {
        servers: 2,
        ..PLAIN
    };
    let (rpc, snapshot) = compare(shape, Rpc::call);
    check_call(&rpc, &snapshot, 0x33);
    assert_eq!(snapshot.endpoint.state, EndpointState::Recv);
    assert_eq!(snapshot.endpoint.queue.head, rpc.servers[1]);
    assert_eq!(snapshot.endpoint.queue.tail, rpc.servers[1]);

    // The first server goes back to the end of the queue.
    let (rpc, snapshot) = compare(shape, |rpc| {
        rpc.call();
        rpc.reply_recv();
    });
    assert_eq!(snapshot.cur, rpc.t.root_tcb);
    assert_eq!(snapshot.endpoint.queue.head, rpc.servers[1]);
    assert_eq!(snapshot.endpoint.queue.tail, rpc.servers[0]);
}

#[test]
fn test_call_to_lower_priority_server() {
    let shape = Shape {
        server_priority: 100,
        ..PLAIN
    };
    let (rpc, snapshot) = compare(shape, Rpc::call);
    check_call(&rpc, &snapshot, 0x33);

    let (rpc, snapshot) = compare(shape, |rpc| {
        rpc.call();
        rpc.reply_recv();
    });
    assert_eq!(snapshot.cur, rpc.t.root_tcb);
    assert!(matches!(
        snapshot.threads[SERVER].state,
        ThreadState::BlockedOnReceive { .. }
    ));
}

#[test]
fn test_reply_recv_matches_general_path() {
    let (rpc, snapshot) = compare(PLAIN, |rpc| {
        rpc.call();
        rpc.reply_recv();
    });
    let root = rpc.t.root_tcb;
    assert_eq!(snapshot.cur, root);
    assert_eq!(snapshot.threads[ROOT].state, ThreadState::Running);
    assert!(matches!(
        snapshot.threads[SERVER].state,
        ThreadState::BlockedOnReceive { .. }
    ));
    assert_eq!(snapshot.endpoint.queue.head, rpc.servers[0]);
    assert_eq!(rpc.t.mr(root, 0), 40);
    assert_eq!(rpc.t.mr(root, 1), 50);
}

#[test]
fn test_reply_recv_with_a_sender_waiting() {
    let shape = Shape {
        sender: true,
        ..PLAIN
    };
    let (rpc, snapshot) = compare(shape, |rpc| {
        rpc.call();
        rpc.send_from_sender();
        rpc.reply_recv();
    });
    // The reply went out and the queued message came straight in.
    assert_eq!(snapshot.threads[ROOT].state, ThreadState::Running);
    assert_eq!(snapshot.threads[SERVER].state, ThreadState::Running);
    assert_eq!(snapshot.endpoint, EndpointObject::new());
    assert_eq!(rpc.t.mr(rpc.servers[0], 0), 77);
    assert_eq!(rpc.t.mr(rpc.t.root_tcb, 0), 40);
}

#[test]
fn test_fastpath_declines_without_side_effects() {
    let mut rpc = Rpc::new(true, PLAIN);
    let before = rpc.snapshot();
    let cptr = u64::from(rpc.cptr);

    // Too long for registers.
    let long = MessageInfo::new(0, 0, 0, 5).to_word();
    assert!(!rpc.t.kernel.fastpath_call(cptr, long));
    // Carries a capability.
    let with_cap = MessageInfo::new(0, 0, 1, 0).to_word();
    assert!(!rpc.t.kernel.fastpath_call(cptr, with_cap));
    // Nothing to reply to.
    let short = MessageInfo::new(0, 0, 0, 1).to_word();
    assert!(!rpc.t.kernel.fastpath_reply_recv(u64::from(rpc.ep_slot), short));
    assert_eq!(rpc.snapshot(), before);

    assert!(rpc.t.kernel.fastpath_call(cptr, short));
    assert_eq!(rpc.t.kernel.cur_thread(), rpc.servers[0]);
}

#[test]
fn test_fastpath_defers_to_a_higher_ready_thread() {
    let mut t = TestKernel::boot();
    let (ep_slot, _) = t.create_endpoint();
    let (_, server) = t.create_thread(10);
    let (_, other) = t.create_thread(50);
    t.run_as(server);
    t.ipc(Syscall::Recv, u64::from(ep_slot), 0, &[]);

    let info = MessageInfo::new(0, 0, 0, 0).to_word();
    assert!(!t.kernel.fastpath_call(u64::from(ep_slot), info));

    // The general path delivers the message and picks the other thread.
    t.ipc(Syscall::Call, u64::from(ep_slot), 0, &[]);
    assert_eq!(t.state_of(t.root_tcb), ThreadState::BlockedOnReply);
    assert_eq!(t.state_of(server), ThreadState::Running);
    assert_eq!(t.kernel.cur_thread(), other);
}
