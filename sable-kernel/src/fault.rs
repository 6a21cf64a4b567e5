//! Thread faults
//!
//! A fault stops a thread and is delivered as an IPC to the endpoint its
//! fault handler CPtr names, as though the thread had performed a Call.
//! The handler's reply decides whether the thread restarts. A thread whose
//! handler cannot be reached has double-faulted and is left Inactive.

use core::fmt;

use sable_cap::{Cap, LookupFault, ObjectRef, ThreadState};
use sable_common::PhysAddr;
use sable_syscall::fault::{cap_fault, reply, user_exception, vm_fault};
use sable_syscall::{FaultLabel, MessageInfo, N_MSG_REGISTERS};

use crate::object::context::{
    EXCEPTION_MESSAGE, MSG_INFO_REG, MSG_REGISTERS, SYSCALL_MESSAGE,
};
use crate::KernelState;

/// A fault a thread is stopped on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    Null,
    /// A CPtr the thread used, or its fault handler CPtr, did not resolve.
    CapFault {
        address: u64,
        in_receive_phase: bool,
        lookup: LookupFault,
    },
    /// The syscall number was not one the kernel knows.
    UnknownSyscall { number: u64 },
    /// Architecture-defined exception.
    UserException { number: u64, code: u64 },
    /// Page fault.
    VmFault {
        address: u64,
        fsr: u64,
        instruction: bool,
    },
}

impl Fault {
    /// Fault label sent as the message label.
    pub const fn label(&self) -> FaultLabel {
        match self {
            Self::Null => FaultLabel::Null,
            Self::CapFault { .. } => FaultLabel::CapFault,
            Self::UnknownSyscall { .. } => FaultLabel::UnknownSyscall,
            Self::UserException { .. } => FaultLabel::UserException,
            Self::VmFault { .. } => FaultLabel::VmFault,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.label().name()
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("no fault"),
            Self::CapFault {
                address,
                in_receive_phase,
                lookup,
            } => write!(
                f,
                "cap fault at {:#x} ({}{})",
                address,
                lookup,
                if *in_receive_phase { ", receive phase" } else { "" }
            ),
            Self::UnknownSyscall { number } => write!(f, "unknown syscall {}", number),
            Self::UserException { number, code } => {
                write!(f, "user exception {} code {:#x}", number, code)
            }
            Self::VmFault {
                address,
                fsr,
                instruction,
            } => write!(
                f,
                "vm fault at {:#x} fsr {:#x}{}",
                address,
                fsr,
                if *instruction { " (instruction)" } else { "" }
            ),
        }
    }
}

impl KernelState {
    /// Deliver `fault` raised by `t` to its fault handler.
    pub fn handle_fault(&mut self, t: ObjectRef, fault: Fault) {
        if let Err(handler_fault) = self.send_fault_ipc(t, fault) {
            self.handle_double_fault(t, fault, handler_fault);
        }
    }

    fn send_fault_ipc(&mut self, t: ObjectRef, fault: Fault) -> Result<(), Fault> {
        let handler_cptr = self.objects.tcb(t).fault_handler;
        let handler = self
            .lookup_cap(t, handler_cptr)
            .map_err(|lookup| Fault::CapFault {
                address: handler_cptr,
                in_receive_phase: false,
                lookup,
            })?;

        match handler {
            Cap::Endpoint {
                object,
                badge,
                rights,
            } if rights.has_write() && (rights.has_grant() || rights.has_grant_reply()) => {
                log::debug!("fault: {} raised {}, sent to {}", t, fault, object);
                self.objects.tcb_mut(t).fault = fault;
                self.send_ipc(true, true, badge, rights.has_grant(), true, t, object);
                Ok(())
            }
            _ => Err(Fault::CapFault {
                address: handler_cptr,
                in_receive_phase: false,
                lookup: LookupFault::MissingCapability { bits_left: 0 },
            }),
        }
    }

    fn handle_double_fault(&mut self, t: ObjectRef, fault: Fault, handler_fault: Fault) {
        log::error!(
            "fault: double fault in {}: {} while handling {} (ip {:#x})",
            t,
            handler_fault,
            fault,
            self.objects.tcb(t).context.restart_pc()
        );
        self.set_thread_state(t, ThreadState::Inactive);
    }

    /// Write the fault `sender` is stopped on into `receiver`'s message
    /// registers. Returns the message length.
    pub(crate) fn set_mrs_fault(
        &mut self,
        sender: ObjectRef,
        receiver: ObjectRef,
        receive_buffer: Option<PhysAddr>,
    ) -> usize {
        let sender_tcb = self.objects.tcb(sender);
        let restart_pc = sender_tcb.context.restart_pc();
        match sender_tcb.fault {
            Fault::Null => panic!("fault transfer from {sender} with no fault"),
            Fault::CapFault {
                address,
                in_receive_phase,
                lookup,
            } => {
                self.set_mr(receiver, receive_buffer, cap_fault::IP, restart_pc);
                self.set_mr(receiver, receive_buffer, cap_fault::ADDR, address);
                self.set_mr(
                    receiver,
                    receive_buffer,
                    cap_fault::IN_RECV_PHASE,
                    u64::from(in_receive_phase),
                );
                self.set_mrs_lookup_failure(
                    receiver,
                    receive_buffer,
                    lookup,
                    cap_fault::LOOKUP_FAILURE_TYPE,
                )
            }
            Fault::UnknownSyscall { number } => {
                self.copy_mrs_fault(sender, receiver, &SYSCALL_MESSAGE, receive_buffer);
                self.set_mr(receiver, receive_buffer, SYSCALL_MESSAGE.len(), number)
            }
            Fault::UserException { number, code } => {
                self.copy_mrs_fault(sender, receiver, &EXCEPTION_MESSAGE, receive_buffer);
                self.set_mr(receiver, receive_buffer, user_exception::NUMBER, number);
                self.set_mr(receiver, receive_buffer, user_exception::CODE, code)
            }
            Fault::VmFault {
                address,
                fsr,
                instruction,
            } => {
                self.set_mr(receiver, receive_buffer, vm_fault::IP, restart_pc);
                self.set_mr(receiver, receive_buffer, vm_fault::ADDR, address);
                self.set_mr(
                    receiver,
                    receive_buffer,
                    vm_fault::PREFETCH_FAULT,
                    u64::from(instruction),
                );
                self.set_mr(receiver, receive_buffer, vm_fault::FSR, fsr)
            }
        }
    }

    /// Write a lookup failure starting at message register `offset`.
    /// Returns the message length.
    pub(crate) fn set_mrs_lookup_failure(
        &mut self,
        receiver: ObjectRef,
        receive_buffer: Option<PhysAddr>,
        lookup: LookupFault,
        offset: usize,
    ) -> usize {
        let (words, count) = lookup.to_words();
        let mut length = 0;
        for (i, word) in words.iter().take(count).enumerate() {
            length = self.set_mr(receiver, receive_buffer, offset + i, *word);
        }
        length
    }

    /// Copy the registers named by `layout` from `sender` into `receiver`'s
    /// message.
    fn copy_mrs_fault(
        &mut self,
        sender: ObjectRef,
        receiver: ObjectRef,
        layout: &[usize],
        receive_buffer: Option<PhysAddr>,
    ) {
        let sender_ctx = self.objects.tcb(sender).context;
        for (i, &reg) in layout.iter().enumerate() {
            let value = sender_ctx.get(reg);
            if i < N_MSG_REGISTERS {
                self.objects
                    .tcb_mut(receiver)
                    .context
                    .set(MSG_REGISTERS[i], value);
            } else if let Some(buffer) = receive_buffer {
                self.write_buffer_word(buffer, i + 1, value);
            }
        }
    }

    /// Apply a fault handler's reply to the faulted `receiver`. Returns
    /// whether the thread should restart.
    pub(crate) fn handle_fault_reply(&mut self, receiver: ObjectRef, sender: ObjectRef) -> bool {
        let info = MessageInfo::from_word(self.objects.tcb(sender).context.get(MSG_INFO_REG));
        match self.objects.tcb(receiver).fault {
            Fault::CapFault { .. } | Fault::VmFault { .. } => true,
            Fault::UnknownSyscall { .. } => {
                let length = info.length.min(reply::UNKNOWN_SYSCALL_LENGTH) as usize;
                self.copy_mrs_fault_reply(sender, receiver, &SYSCALL_MESSAGE[..length]);
                info.label == 0
            }
            Fault::UserException { .. } => {
                let length = info.length.min(reply::USER_EXCEPTION_LENGTH) as usize;
                self.copy_mrs_fault_reply(sender, receiver, &EXCEPTION_MESSAGE[..length]);
                info.label == 0
            }
            Fault::Null => panic!("fault reply to {receiver} with no fault"),
        }
    }

    fn copy_mrs_fault_reply(&mut self, sender: ObjectRef, receiver: ObjectRef, layout: &[usize]) {
        let sender_ctx = self.objects.tcb(sender).context;
        let send_buffer = if layout.len() > N_MSG_REGISTERS {
            self.lookup_ipc_buffer(false, sender)
        } else {
            None
        };
        for (i, &reg) in layout.iter().enumerate() {
            let value = if i < N_MSG_REGISTERS {
                Some(sender_ctx.get(MSG_REGISTERS[i]))
            } else {
                send_buffer.map(|buffer| self.read_buffer_word(buffer, i + 1))
            };
            if let Some(value) = value {
                self.objects.tcb_mut(receiver).context.set(reg, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(Fault::Null.label(), FaultLabel::Null);
        assert_eq!(
            Fault::UserException { number: 1, code: 2 }.label() as u64,
            3
        );
        assert_eq!(
            Fault::CapFault {
                address: 0,
                in_receive_phase: false,
                lookup: LookupFault::InvalidRoot,
            }
            .name(),
            "CapFault"
        );
    }
}
