//! Scenario tests that drive the kernel through its syscall entry points,
//! as the root thread and threads it creates.

mod fastpath;
mod ipc;
mod preempt;

use sable_cap::root_slots::Slot;
use sable_cap::CapRights;
use sable_syscall::InvocationLabel;

use crate::testing::TestKernel;

/// CPtr of the root CNode in the root CSpace.
const ROOT_CNODE: u64 = Slot::InitThreadCNode.index() as u64;

/// Depth that resolves a root CNode index completely.
const FULL_DEPTH: u64 = 64;

/// Mint `src` into `dest` with `rights` and `badge`; returns the reply label.
fn mint(t: &mut TestKernel, src: u32, dest: u32, rights: CapRights, badge: u64) -> u64 {
    t.call(
        ROOT_CNODE,
        InvocationLabel::CNodeMint,
        &[
            u64::from(dest),
            FULL_DEPTH,
            u64::from(src),
            FULL_DEPTH,
            u64::from(rights.bits()),
            badge,
        ],
        &[ROOT_CNODE],
    )
    .label
}

/// Copy `src` into `dest` with `rights`; returns the reply label.
fn copy(t: &mut TestKernel, src: u32, dest: u32, rights: CapRights) -> u64 {
    t.call(
        ROOT_CNODE,
        InvocationLabel::CNodeCopy,
        &[
            u64::from(dest),
            FULL_DEPTH,
            u64::from(src),
            FULL_DEPTH,
            u64::from(rights.bits()),
        ],
        &[ROOT_CNODE],
    )
    .label
}

/// Apply a single-slot CNode operation to root slot `index`.
fn cnode_op(t: &mut TestKernel, label: InvocationLabel, index: u32) -> u64 {
    t.call(ROOT_CNODE, label, &[u64::from(index), FULL_DEPTH], &[])
        .label
}
