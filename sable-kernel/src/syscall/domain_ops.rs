//! Domain invocations

use sable_cap::Cap;
use sable_syscall::InvocationLabel;

use super::invocation::Invocation;
use super::SyscallError;
use crate::{KernelResult, KernelState};

impl KernelState {
    /// Move a thread into another scheduling domain.
    ///
    /// # ABI
    ///
    /// - MR0: domain
    /// - extra cap 0: thread
    pub(crate) fn decode_domain_invocation(&mut self, inv: &Invocation) -> KernelResult {
        if inv.label != InvocationLabel::DomainSetSet {
            return Err(SyscallError::IllegalOperation.into());
        }
        if inv.length == 0 {
            return Err(SyscallError::TruncatedMessage.into());
        }
        let domain = self.syscall_arg(inv, 0);
        if domain >= self.config.num_domains as u64 {
            log::warn!("domain: no domain {}", domain);
            return Err(SyscallError::InvalidArgument { argument: 0 }.into());
        }
        let tcb = match self.extra_cap(inv, 0) {
            None => return Err(SyscallError::TruncatedMessage.into()),
            Some((Cap::Thread { tcb }, _)) => tcb,
            Some((other, _)) => {
                log::warn!("domain: {} is not a thread", other);
                return Err(SyscallError::InvalidArgument { argument: 1 }.into());
            }
        };

        self.restart_invoker(inv);
        self.set_domain(tcb, domain as u8);
        Ok(())
    }
}
