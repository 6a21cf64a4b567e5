//! Syscall interface
//!
//! The kernel exposes eight syscalls; everything else is an invocation of
//! a capability through Send or Call.
//!
//! # ABI
//!
//! - `CAP_REG` (x0): capability pointer
//! - `MSG_INFO_REG` (x1): message-info word
//! - `MSG_REGISTERS` (x2-x5): first message registers
//! - the rest of the message and the extra capability pointers come from
//!   the IPC buffer
//!
//! The trap layer saves the user registers into the current thread's
//! context before calling an entry point and restores them afterwards.
//!
//! # Entry Points
//!
//! Each entry point handles one trap and then runs [`KernelState::kernel_exit`],
//! which resolves the scheduler decision and activates the thread to
//! return to.

mod cnode_ops;
mod domain_ops;
pub mod error;
pub mod invocation;
mod irq_ops;
mod mem_ops;
mod tcb_ops;

pub use error::SyscallError;
pub use invocation::Invocation;

use sable_cap::{Cap, LookupFault, ObjectRef, ThreadState};
use sable_syscall::{InvocationLabel, MessageInfo, Syscall, N_MSG_REGISTERS};

use crate::fault::Fault;
use crate::object::context::{CAP_REG, MSG_INFO_REG};
use crate::{KernelError, KernelResult, KernelState, Preempted};

impl KernelState {
    /// Kernel entry for a syscall instruction.
    pub fn handle_syscall(&mut self, number: u64) {
        let Some(syscall) = Syscall::from_number(number) else {
            self.handle_unknown_syscall(number);
            return;
        };
        let cur = self.cur_thread();
        let (cptr, msg_info) = {
            let ctx = &self.objects.tcb(cur).context;
            (ctx.get(CAP_REG), ctx.get(MSG_INFO_REG))
        };
        log::trace!("syscall: {} from {} (cptr {:#x})", syscall.name(), cur, cptr);

        if self.config.fastpath {
            let taken = match syscall {
                Syscall::Call => self.fastpath_call(cptr, msg_info),
                Syscall::ReplyRecv => self.fastpath_reply_recv(cptr, msg_info),
                _ => false,
            };
            if taken {
                log::trace!("syscall: {} took the fast path", syscall.name());
                self.kernel_exit();
                return;
            }
        }

        match syscall {
            Syscall::Send => self.handle_invocation_entry(false, true),
            Syscall::NBSend => self.handle_invocation_entry(false, false),
            Syscall::Call => self.handle_invocation_entry(true, true),
            Syscall::Recv => self.handle_recv(true),
            Syscall::NBRecv => self.handle_recv(false),
            Syscall::Reply => self.handle_reply(),
            Syscall::ReplyRecv => {
                self.handle_reply();
                self.handle_recv(true);
            }
            Syscall::Yield => self.handle_yield(),
        }
        self.kernel_exit();
    }

    /// Run an invocation; a preempted one gives way to the pending
    /// interrupt.
    fn handle_invocation_entry(&mut self, is_call: bool, is_blocking: bool) {
        if self.handle_invocation(is_call, is_blocking).is_err() {
            if let Some(irq) = self.machine.active_irq() {
                self.handle_interrupt(irq);
            }
        }
    }

    /// Look up, decode and perform the invocation the current thread asks
    /// for.
    fn handle_invocation(&mut self, is_call: bool, is_blocking: bool) -> Result<(), Preempted> {
        let thread = self.cur_thread();
        let cptr = self.objects.tcb(thread).context.get(CAP_REG);

        match self.invoke_cap(thread, is_call, is_blocking) {
            Ok(()) => {}
            Err(KernelError::Preempted) => return Err(Preempted),
            Err(KernelError::Syscall(error)) => {
                if is_call {
                    self.reply_from_kernel_error(thread, error);
                }
                return Ok(());
            }
            Err(KernelError::Lookup(lookup)) => {
                log::warn!("syscall: invocation of missing cap #{:#x}: {}", cptr, lookup);
                if is_blocking {
                    self.handle_fault(
                        thread,
                        Fault::CapFault {
                            address: cptr,
                            in_receive_phase: false,
                            lookup,
                        },
                    );
                }
                return Ok(());
            }
            Err(KernelError::Fault(fault)) => {
                log::warn!("syscall: extra cap lookup failed: {}", fault);
                if is_blocking {
                    self.handle_fault(thread, fault);
                }
                return Ok(());
            }
        }

        if self.objects.tcb(thread).state == ThreadState::Restart {
            if is_call {
                self.reply_from_kernel_success_empty(thread);
            }
            self.set_thread_state(thread, ThreadState::Running);
        }
        Ok(())
    }

    fn invoke_cap(&mut self, thread: ObjectRef, is_call: bool, is_blocking: bool) -> KernelResult {
        let (cptr, raw_info) = {
            let ctx = &self.objects.tcb(thread).context;
            (ctx.get(CAP_REG), ctx.get(MSG_INFO_REG))
        };
        let info = MessageInfo::from_word(raw_info);

        let (cap, slot) = self.lookup_cap_and_slot(thread, cptr)?;
        let buffer = self.lookup_ipc_buffer(false, thread);
        let extra_caps = self.lookup_extra_caps(thread, buffer, info)?;

        let mut length = info.length as usize;
        if buffer.is_none() && length > N_MSG_REGISTERS {
            length = N_MSG_REGISTERS;
        }
        let inv = Invocation {
            thread,
            label: InvocationLabel::from_label(info.label),
            length,
            cptr,
            slot,
            cap,
            extra_caps,
            buffer,
            is_call,
            is_blocking,
        };

        let result = self.decode_invocation(&inv);
        if let Err(KernelError::Syscall(error)) = result {
            log::warn!(
                "syscall: {} on {} failed: {}",
                inv.label.name(),
                cap,
                error
            );
        }
        result
    }

    /// Receive on the endpoint or notification the current thread names.
    fn handle_recv(&mut self, is_blocking: bool) {
        let thread = self.cur_thread();
        let cptr = self.objects.tcb(thread).context.get(CAP_REG);
        let cap = match self.lookup_cap(thread, cptr) {
            Ok(cap) => cap,
            Err(lookup) => {
                self.recv_fault(thread, cptr, lookup);
                return;
            }
        };
        let missing = LookupFault::MissingCapability { bits_left: 0 };
        match cap {
            Cap::Endpoint { .. } => {
                if !cap.can_receive() {
                    self.recv_fault(thread, cptr, missing);
                    return;
                }
                self.delete_caller_cap(thread);
                self.receive_ipc(thread, cap, is_blocking);
            }
            Cap::Notification { object, .. } => {
                let bound = self.objects.notification(object).bound_tcb;
                if !cap.can_receive() || (bound.is_valid() && bound != thread) {
                    self.recv_fault(thread, cptr, missing);
                    return;
                }
                self.receive_signal(thread, cap, is_blocking);
            }
            _ => self.recv_fault(thread, cptr, missing),
        }
    }

    fn recv_fault(&mut self, thread: ObjectRef, cptr: u64, lookup: LookupFault) {
        log::warn!("syscall: receive on cap #{:#x} failed: {}", cptr, lookup);
        self.handle_fault(
            thread,
            Fault::CapFault {
                address: cptr,
                in_receive_phase: true,
                lookup,
            },
        );
    }

    /// Kernel entry for an undefined syscall number.
    pub fn handle_unknown_syscall(&mut self, number: u64) {
        let cur = self.cur_thread();
        log::warn!("syscall: unknown syscall {} from {}", number, cur);
        self.handle_fault(cur, Fault::UnknownSyscall { number });
        self.kernel_exit();
    }

    /// Kernel entry for an architecture-defined user exception.
    pub fn handle_user_level_fault(&mut self, number: u64, code: u64) {
        let cur = self.cur_thread();
        self.handle_fault(cur, Fault::UserException { number, code });
        self.kernel_exit();
    }

    /// Kernel entry for a page fault.
    pub fn handle_vm_fault_entry(&mut self, address: u64, fsr: u64, instruction: bool) {
        let cur = self.cur_thread();
        self.handle_fault(
            cur,
            Fault::VmFault {
                address,
                fsr,
                instruction,
            },
        );
        self.kernel_exit();
    }

    /// Resolve the scheduler decision and prepare the thread to return to.
    pub fn kernel_exit(&mut self) {
        self.schedule();
        self.activate_thread();
        self.flush_remote_ipis();
    }
}
