//! Object invocation dispatch
//!
//! A Send or Call on a capability to a kernel object is an invocation.
//! [`KernelState::decode_invocation`] routes it by capability type to the
//! decoder for that object. Every decoder follows the same contract:
//!
//! 1. Validate the label, the message length, the arguments and the
//!    extra capabilities, without changing any state.
//! 2. Put the invoker into `Restart`.
//! 3. Perform the operation.
//!
//! A decoder that fails in step 1 leaves the kernel untouched; the error
//! is returned to a caller as an error reply. An operation that stops at
//! a preemption point in step 3 leaves the invoker in `Restart`, so the
//! whole invocation is issued again when it next runs.

use sable_cap::{Cap, ObjectRef, SlotRef, SlotStore, ThreadState};
use sable_common::PhysAddr;
use sable_syscall::InvocationLabel;

use super::SyscallError;
use crate::cap::cspace::ExtraCaps;
use crate::{KernelResult, KernelState};

/// One decoded invocation request.
#[derive(Clone, Copy, Debug)]
pub struct Invocation {
    /// Invoking thread.
    pub thread: ObjectRef,
    pub label: InvocationLabel,
    /// Message length, limited to the registers when there is no buffer.
    pub length: usize,
    /// CPtr of the invoked capability.
    pub cptr: u64,
    /// Slot of the invoked capability.
    pub slot: SlotRef,
    pub cap: Cap,
    pub extra_caps: ExtraCaps,
    /// Invoker's IPC buffer.
    pub buffer: Option<PhysAddr>,
    pub is_call: bool,
    pub is_blocking: bool,
}

impl KernelState {
    /// Argument `index` of an invocation.
    pub(crate) fn syscall_arg(&self, inv: &Invocation, index: usize) -> u64 {
        self.get_mr(inv.thread, inv.buffer, index)
    }

    /// Extra capability `index` of an invocation, with its slot.
    pub(crate) fn extra_cap(&self, inv: &Invocation, index: usize) -> Option<(Cap, SlotRef)> {
        inv.extra_caps
            .get(index)
            .copied()
            .flatten()
            .map(|slot| (self.objects.cte(slot).cap, slot))
    }

    /// Put the invoker into `Restart`; called once validation is over.
    #[inline]
    pub(crate) fn restart_invoker(&mut self, inv: &Invocation) {
        self.set_thread_state(inv.thread, ThreadState::Restart);
    }

    /// Decode and perform an invocation of `inv.cap`.
    pub fn decode_invocation(&mut self, inv: &Invocation) -> KernelResult {
        match inv.cap {
            Cap::Null | Cap::Zombie { .. } => {
                log::warn!("invoke: cap #{} is {}", inv.cptr, inv.cap);
                Err(SyscallError::InvalidCapability { argument: 0 }.into())
            }
            Cap::Endpoint {
                object,
                badge,
                rights,
            } => {
                if !rights.has_write() {
                    log::warn!("invoke: endpoint #{} has no send right", inv.cptr);
                    return Err(SyscallError::InvalidCapability { argument: 0 }.into());
                }
                self.restart_invoker(inv);
                self.send_ipc(
                    inv.is_blocking,
                    inv.is_call,
                    badge,
                    rights.has_grant(),
                    rights.has_grant_reply(),
                    inv.thread,
                    object,
                );
                Ok(())
            }
            Cap::Notification { object, badge, .. } => {
                if !inv.cap.can_send() {
                    log::warn!("invoke: notification #{} has no signal right", inv.cptr);
                    return Err(SyscallError::InvalidCapability { argument: 0 }.into());
                }
                self.restart_invoker(inv);
                self.send_signal(object, badge.value());
                Ok(())
            }
            Cap::Reply {
                tcb,
                master,
                can_grant,
            } => {
                if master {
                    log::warn!("invoke: reply master #{}", inv.cptr);
                    return Err(SyscallError::InvalidCapability { argument: 0 }.into());
                }
                self.restart_invoker(inv);
                self.do_reply_transfer(inv.thread, tcb, inv.slot, can_grant);
                Ok(())
            }
            Cap::Thread { tcb } => self.decode_tcb_invocation(inv, tcb),
            Cap::Domain => self.decode_domain_invocation(inv),
            Cap::CNode { .. } => self.decode_cnode_invocation(inv),
            Cap::Untyped { .. } => self.decode_untyped_invocation(inv),
            Cap::IrqControl => self.decode_irq_control_invocation(inv),
            Cap::IrqHandler { irq } => self.decode_irq_handler_invocation(inv, irq),
            Cap::Frame { .. } => self.decode_frame_invocation(inv),
            Cap::PageTable { .. } => self.decode_page_table_invocation(inv),
        }
    }
}
