//! IRQ invocations
//!
//! - IRQ control: IssueIRQHandler hands out the handler capability for one
//!   line and marks the line as delivering signals
//! - IRQ handler: AckIRQ unmasks the line after a delivery; SetIRQHandler
//!   and ClearIRQHandler change the notification in the line's slot of the
//!   IRQ node

use sable_cap::{Cap, CdtOps, IrqNumber, IrqState};
use sable_syscall::InvocationLabel;

use super::invocation::Invocation;
use super::SyscallError;
use crate::{KernelResult, KernelState};

impl KernelState {
    /// # ABI
    ///
    /// - MR0: IRQ number
    /// - MR1: destination index, from the CNode in extra cap 0
    /// - MR2: destination depth
    pub(crate) fn decode_irq_control_invocation(&mut self, inv: &Invocation) -> KernelResult {
        if inv.label != InvocationLabel::IrqIssueIrqHandler {
            log::warn!("irq: illegal control operation {}", inv.label.name());
            return Err(SyscallError::IllegalOperation.into());
        }
        let root = self.extra_cap(inv, 0);
        let Some((root, _)) = root.filter(|_| inv.length >= 3) else {
            return Err(SyscallError::TruncatedMessage.into());
        };
        let irq_word = self.syscall_arg(inv, 0);
        let index = self.syscall_arg(inv, 1);
        let depth = self.syscall_arg(inv, 2);

        let max_irq = self.config.max_irq;
        if irq_word > u64::from(max_irq) {
            log::warn!("irq: line {} above {}", irq_word, max_irq);
            return Err(SyscallError::RangeError {
                min: 0,
                max: u64::from(max_irq),
            }
            .into());
        }
        let irq = IrqNumber(irq_word as u16);
        if self.is_irq_active(irq) {
            log::warn!("irq: line {} already has a handler", irq);
            return Err(SyscallError::RevokeFirst.into());
        }
        let dest = self.lookup_target_slot(root, index, depth)?;
        self.objects.ensure_empty_slot(dest)?;

        self.restart_invoker(inv);
        log::debug!("irq: issue handler for line {} into {}", irq, dest);
        self.set_irq_state(irq, IrqState::Signal);
        self.objects
            .cte_insert(Cap::IrqHandler { irq }, inv.slot, dest);
        Ok(())
    }

    pub(crate) fn decode_irq_handler_invocation(
        &mut self,
        inv: &Invocation,
        irq: IrqNumber,
    ) -> KernelResult {
        match inv.label {
            InvocationLabel::IrqAckIrq => {
                self.restart_invoker(inv);
                self.machine.mask_irq(irq, false);
                Ok(())
            }
            InvocationLabel::IrqSetIrqHandler => {
                let Some((cap, slot)) = self.extra_cap(inv, 0) else {
                    return Err(SyscallError::TruncatedMessage.into());
                };
                if !matches!(cap, Cap::Notification { .. }) || !cap.can_send() {
                    log::warn!("irq: handler {} cannot signal", cap);
                    return Err(SyscallError::InvalidCapability { argument: 0 }.into());
                }
                self.restart_invoker(inv);
                let irq_slot = self.irq_slot(irq);
                self.cte_delete_one(irq_slot);
                self.objects.cte_insert(cap, slot, irq_slot);
                Ok(())
            }
            InvocationLabel::IrqClearIrqHandler => {
                self.restart_invoker(inv);
                let irq_slot = self.irq_slot(irq);
                self.cte_delete_one(irq_slot);
                Ok(())
            }
            other => {
                log::warn!("irq: illegal handler operation {}", other.name());
                Err(SyscallError::IllegalOperation.into())
            }
        }
    }
}
