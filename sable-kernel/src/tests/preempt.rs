//! Revoke and delete stop at a pending interrupt and finish when the
//! invoker issues them again.

use sable_cap::{
    Cap, CapRights, CdtOps, IrqNumber, IrqState, ObjectRef, ObjectType, SlotRef, SlotStore,
    ThreadState, ZombieKind,
};
use sable_syscall::{InvocationLabel, Syscall, SyscallErrorKind};

use super::{cnode_op, copy, mint, FULL_DEPTH, ROOT_CNODE};
use crate::config::KernelConfig;
use crate::object::context::{FAULT_IP, NEXT_IP};
use crate::testing::TestKernel;

const OK: u64 = SyscallErrorKind::NoError.as_u64();
const IRQ: IrqNumber = IrqNumber(9);
const SYSCALL_PC: u64 = 0x1_0040;

/// A thread above the root thread, waiting for `IRQ`.
#[derive(Clone, Copy)]
struct Driver {
    thread: ObjectRef,
    ntfn_slot: u32,
}

/// A kernel that polls for interrupts after every unit of work.
fn boot() -> (TestKernel, Driver) {
    let mut t = TestKernel::boot_with(KernelConfig {
        max_work_units_per_preemption: 1,
        ..KernelConfig::default()
    });
    let root = t.root_tcb;
    t.kernel.set_priority(root, 100);
    t.kernel.kernel_exit();

    let (ntfn_slot, ntfn) = t.create(ObjectType::Notification, 0);
    let irq_slot = t.kernel.irq_slot(IRQ);
    t.kernel.objects.cte_mut(irq_slot).cap = ntfn;
    t.kernel.set_irq_state(IRQ, IrqState::Signal);

    let (_, thread) = t.create_thread(200);
    assert_eq!(t.kernel.cur_thread(), thread);
    t.ipc(Syscall::Recv, u64::from(ntfn_slot), 0, &[]);
    assert_eq!(t.kernel.cur_thread(), root);
    (t, Driver { thread, ntfn_slot })
}

impl Driver {
    /// Issue a CNode operation on root slot `index` with `IRQ` pending.
    /// The driver takes over and the root thread waits to restart the
    /// syscall.
    fn interrupt(self, t: &mut TestKernel, label: InvocationLabel, index: u32) {
        let root = t.root_tcb;
        let ctx = &mut t.kernel.tcb_mut(root).context;
        ctx.set(FAULT_IP, SYSCALL_PC);
        ctx.set(NEXT_IP, SYSCALL_PC + 4);
        t.machine().raise_irq(IRQ);

        cnode_op(t, label, index);
        assert_eq!(t.machine().acked(), &[IRQ]);
        assert_eq!(t.kernel.cur_thread(), self.thread);
        assert_eq!(t.state_of(root), ThreadState::Restart);
        assert!(t.kernel.tcb(root).queued);

        t.ipc(Syscall::Recv, u64::from(self.ntfn_slot), 0, &[]);
        assert_eq!(t.kernel.cur_thread(), root);
        assert_eq!(t.state_of(root), ThreadState::Running);
        assert_eq!(t.kernel.tcb(root).context.get(NEXT_IP), SYSCALL_PC);
    }
}

#[test]
fn test_preempted_revoke_resumes() {
    let (mut t, driver) = boot();

    // untyped -> untyped -> endpoint -> badged endpoint -> copy
    let ut = t.alloc_slots(5);
    assert_eq!(t.retype(ObjectType::Untyped, 16, ut, 1), OK);
    assert_eq!(t.retype_from(ut, ObjectType::Untyped, 12, ut + 1, 1), OK);
    assert_eq!(t.retype_from(ut + 1, ObjectType::Endpoint, 0, ut + 2, 1), OK);
    assert_eq!(mint(&mut t, ut + 2, ut + 3, CapRights::ALL, 5), OK);
    assert_eq!(copy(&mut t, ut + 3, ut + 4, CapRights::ALL), OK);

    driver.interrupt(&mut t, InvocationLabel::CNodeRevoke, ut);
    assert!(t.cap_at(ut + 1).is_null());
    for i in 2..5 {
        assert!(!t.cap_at(ut + i).is_null(), "slot {} already revoked", ut + i);
    }

    assert_eq!(cnode_op(&mut t, InvocationLabel::CNodeRevoke, ut), OK);
    for i in 1..5 {
        assert!(t.cap_at(ut + i).is_null(), "slot {} survived", ut + i);
    }
    assert!(matches!(t.cap_at(ut), Cap::Untyped { .. }));
    assert!(t
        .kernel
        .objects()
        .ensure_no_children(t.root_slot(ut))
        .is_ok());
}

#[test]
fn test_preempted_cnode_delete_resumes() {
    let (mut t, driver) = boot();
    let (ep_slot, _) = t.create_endpoint();
    let (node_slot, node_cap) = t.create(ObjectType::CapTable, 4);
    let Cap::CNode { object: node, .. } = node_cap else {
        panic!("retype made {node_cap}");
    };
    for i in 0..3 {
        let reply = t.call(
            u64::from(node_slot),
            InvocationLabel::CNodeCopy,
            &[
                i,
                4,
                u64::from(ep_slot),
                FULL_DEPTH,
                u64::from(CapRights::ALL.bits()),
            ],
            &[ROOT_CNODE],
        );
        assert_eq!(reply.label, OK);
    }

    // The CNode becomes a Zombie, and only its empty top slot is gone
    // when the interrupt arrives.
    driver.interrupt(&mut t, InvocationLabel::CNodeDelete, node_slot);
    assert_eq!(
        t.cap_at(node_slot),
        Cap::Zombie {
            object: node,
            kind: ZombieKind::CNode { radix: 4 },
            number: 15,
        }
    );
    for i in 0..3 {
        assert!(matches!(
            t.kernel.objects().cte(SlotRef::new(node, i)).cap,
            Cap::Endpoint { .. }
        ));
    }

    assert_eq!(cnode_op(&mut t, InvocationLabel::CNodeDelete, node_slot), OK);
    assert!(t.cap_at(node_slot).is_null());
    for i in 0..16 {
        assert!(t.kernel.objects().cte(SlotRef::new(node, i)).is_empty());
    }
    assert!(matches!(t.cap_at(ep_slot), Cap::Endpoint { .. }));
    let next = t.kernel.objects().cte(t.root_slot(ep_slot)).mdb.next;
    assert!(next.map_or(true, |slot| slot.object != node));
}
