//! TCB invocations
//!
//! Thread configuration (CSpace, VSpace, IPC buffer, fault handler),
//! scheduling parameters, register access, suspend/resume, notification
//! binding, core affinity and the TLS base.
//!
//! Space and buffer changes go through [`KernelState::invoke_thread_control`],
//! which deletes the old capability from the TCB slot and then installs
//! the new one only if neither it nor the thread was deleted meanwhile.

use sable_cap::{
    Cap, CdtOps, NotificationState, ObjectRef, SlotRef, SlotStore, TcbSlot, ThreadState,
};
use sable_common::VirtAddr;
use sable_syscall::{InvocationLabel, MessageInfo, IPC_BUFFER_SIZE_BITS};

use super::invocation::Invocation;
use super::SyscallError;
use crate::object::context::{
    BADGE_REG, FRAME_REGISTERS, GP_REGISTERS, MSG_INFO_REG, NEXT_IP, TLS_BASE,
};
use crate::object::tcb::tcb_slot;
use crate::{KernelResult, KernelState, Preempted};

// -- Register transfer flags
const SUSPEND_SOURCE: u64 = 1 << 0;
const RESUME_TARGET: u64 = 1 << 1;
const TRANSFER_FRAME: u64 = 1 << 2;
const TRANSFER_INTEGER: u64 = 1 << 3;

/// ReadRegisters/WriteRegisters resume or suspend with bit 0.
const REGISTER_ACTION: u64 = 1 << 0;

const NUM_USER_REGISTERS: usize = FRAME_REGISTERS.len() + GP_REGISTERS.len();

/// Register `i` in the order ReadRegisters and WriteRegisters use.
fn user_register(i: usize) -> usize {
    if i < FRAME_REGISTERS.len() {
        FRAME_REGISTERS[i]
    } else {
        GP_REGISTERS[i - FRAME_REGISTERS.len()]
    }
}

/// A new capability for a TCB slot, with the slot it was derived from.
#[derive(Clone, Copy, Debug)]
pub struct SlotUpdate {
    pub cap: Cap,
    pub src: SlotRef,
}

/// Changes made by Configure, SetSpace, SetIPCBuffer and the priority
/// operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadControl {
    pub fault_handler: Option<u64>,
    pub mcp: Option<u8>,
    pub priority: Option<u8>,
    pub croot: Option<SlotUpdate>,
    pub vroot: Option<SlotUpdate>,
    /// New buffer address, with the frame to install (none for address 0).
    pub ipc_buffer: Option<(VirtAddr, Option<SlotUpdate>)>,
}

impl KernelState {
    pub(crate) fn decode_tcb_invocation(&mut self, inv: &Invocation, tcb: ObjectRef) -> KernelResult {
        // The target may be running elsewhere; park it before touching it.
        if matches!(
            inv.label,
            InvocationLabel::TcbReadRegisters
                | InvocationLabel::TcbWriteRegisters
                | InvocationLabel::TcbCopyRegisters
                | InvocationLabel::TcbSuspend
                | InvocationLabel::TcbResume
        ) {
            self.remote_tcb_stall(tcb);
        }

        match inv.label {
            InvocationLabel::TcbReadRegisters => self.decode_read_registers(inv, tcb),
            InvocationLabel::TcbWriteRegisters => self.decode_write_registers(inv, tcb),
            InvocationLabel::TcbCopyRegisters => self.decode_copy_registers(inv, tcb),
            InvocationLabel::TcbConfigure => self.decode_configure(inv, tcb),
            InvocationLabel::TcbSetPriority => self.decode_set_priority(inv, tcb),
            InvocationLabel::TcbSetMCPriority => self.decode_set_mc_priority(inv, tcb),
            InvocationLabel::TcbSetSchedParams => self.decode_set_sched_params(inv, tcb),
            InvocationLabel::TcbSetIPCBuffer => self.decode_set_ipc_buffer(inv, tcb),
            InvocationLabel::TcbSetSpace => self.decode_set_space(inv, tcb),
            InvocationLabel::TcbSuspend => {
                self.restart_invoker(inv);
                self.suspend(tcb);
                Ok(())
            }
            InvocationLabel::TcbResume => {
                self.restart_invoker(inv);
                self.restart(tcb);
                Ok(())
            }
            InvocationLabel::TcbBindNotification => self.decode_bind_notification(inv, tcb),
            InvocationLabel::TcbUnbindNotification => {
                if self.objects.tcb(tcb).bound_notification.is_null() {
                    log::warn!("tcb: {} has no bound notification", tcb);
                    return Err(SyscallError::IllegalOperation.into());
                }
                self.restart_invoker(inv);
                self.unbind_notification(tcb);
                Ok(())
            }
            InvocationLabel::TcbSetAffinity => {
                if inv.length < 1 {
                    return Err(SyscallError::TruncatedMessage.into());
                }
                let core = self.syscall_arg(inv, 0);
                if core >= self.config.num_nodes as u64 {
                    log::warn!("tcb: no core {}", core);
                    return Err(SyscallError::InvalidArgument { argument: 0 }.into());
                }
                self.restart_invoker(inv);
                self.set_affinity(tcb, core as usize);
                Ok(())
            }
            InvocationLabel::TcbSetTLSBase => {
                if inv.length < 1 {
                    return Err(SyscallError::TruncatedMessage.into());
                }
                let base = self.syscall_arg(inv, 0);
                self.restart_invoker(inv);
                self.objects.tcb_mut(tcb).context.set(TLS_BASE, base);
                if tcb == self.cur_thread() {
                    self.reschedule_required();
                }
                Ok(())
            }
            other => {
                log::warn!("tcb: illegal operation {}", other.name());
                Err(SyscallError::IllegalOperation.into())
            }
        }
    }

    // -- Registers

    /// # ABI
    ///
    /// - MR0: flags; bit 0 suspends the source first
    /// - MR1: number of registers
    fn decode_read_registers(&mut self, inv: &Invocation, tcb: ObjectRef) -> KernelResult {
        if inv.length < 2 {
            return Err(SyscallError::TruncatedMessage.into());
        }
        let flags = self.syscall_arg(inv, 0);
        let count = self.syscall_arg(inv, 1);
        if count < 1 || count > NUM_USER_REGISTERS as u64 {
            log::warn!("tcb: read of {} registers", count);
            return Err(SyscallError::RangeError {
                min: 1,
                max: NUM_USER_REGISTERS as u64,
            }
            .into());
        }
        if tcb == self.cur_thread() {
            return Err(SyscallError::IllegalOperation.into());
        }

        self.restart_invoker(inv);
        if flags & REGISTER_ACTION != 0 {
            self.suspend(tcb);
        }
        if inv.is_call {
            let receive_buffer = self.lookup_ipc_buffer(true, inv.thread);
            let mut length = 0;
            for i in 0..count as usize {
                let value = self.objects.tcb(tcb).context.get(user_register(i));
                length = self.set_mr(inv.thread, receive_buffer, i, value);
            }
            let info = MessageInfo::new(0, 0, 0, length as u64);
            let ctx = &mut self.objects.tcb_mut(inv.thread).context;
            ctx.set(BADGE_REG, 0);
            ctx.set(MSG_INFO_REG, info.to_word());
        }
        self.set_thread_state(inv.thread, ThreadState::Running);
        Ok(())
    }

    /// # ABI
    ///
    /// - MR0: flags; bit 0 resumes the target afterwards
    /// - MR1: number of registers
    /// - MR2..: register values
    fn decode_write_registers(&mut self, inv: &Invocation, tcb: ObjectRef) -> KernelResult {
        if inv.length < 2 {
            return Err(SyscallError::TruncatedMessage.into());
        }
        let flags = self.syscall_arg(inv, 0);
        let count = self.syscall_arg(inv, 1);
        if (inv.length as u64 - 2) < count {
            log::warn!("tcb: write of {} registers in {} words", count, inv.length);
            return Err(SyscallError::TruncatedMessage.into());
        }
        if tcb == self.cur_thread() {
            return Err(SyscallError::IllegalOperation.into());
        }

        self.restart_invoker(inv);
        let count = (count as usize).min(NUM_USER_REGISTERS);
        for i in 0..count {
            let value = self.syscall_arg(inv, i + 2);
            self.objects.tcb_mut(tcb).context.set(user_register(i), value);
        }
        let ctx = &mut self.objects.tcb_mut(tcb).context;
        let pc = ctx.restart_pc();
        ctx.set(NEXT_IP, pc);

        if flags & REGISTER_ACTION != 0 {
            self.restart(tcb);
        }
        if tcb == self.cur_thread() {
            self.reschedule_required();
        }
        Ok(())
    }

    /// # ABI
    ///
    /// - MR0: flags (suspend source, resume target, frame, integer)
    /// - extra cap 0: source thread
    fn decode_copy_registers(&mut self, inv: &Invocation, tcb: ObjectRef) -> KernelResult {
        let source = self.extra_cap(inv, 0);
        let Some((source, _)) = source.filter(|_| inv.length >= 1) else {
            return Err(SyscallError::TruncatedMessage.into());
        };
        let Cap::Thread { tcb: src } = source else {
            log::warn!("tcb: copy registers from {}", source);
            return Err(SyscallError::InvalidCapability { argument: 1 }.into());
        };
        let flags = self.syscall_arg(inv, 0);

        self.restart_invoker(inv);
        if flags & SUSPEND_SOURCE != 0 {
            self.suspend(src);
        }
        if flags & RESUME_TARGET != 0 {
            self.restart(tcb);
        }
        let src_ctx = self.objects.tcb(src).context;
        let ctx = &mut self.objects.tcb_mut(tcb).context;
        if flags & TRANSFER_FRAME != 0 {
            for reg in FRAME_REGISTERS {
                ctx.set(reg, src_ctx.get(reg));
            }
            let pc = ctx.restart_pc();
            ctx.set(NEXT_IP, pc);
        }
        if flags & TRANSFER_INTEGER != 0 {
            for reg in GP_REGISTERS {
                ctx.set(reg, src_ctx.get(reg));
            }
        }
        if tcb == self.cur_thread() {
            self.reschedule_required();
        }
        Ok(())
    }

    // -- Configuration

    /// # ABI
    ///
    /// - MR0: fault handler CPtr
    /// - MR1: CSpace root data (guard), 0 to keep
    /// - MR2: VSpace root data
    /// - MR3: IPC buffer address, 0 for none
    /// - extra caps: CSpace root, VSpace root, IPC buffer frame
    fn decode_configure(&mut self, inv: &Invocation, tcb: ObjectRef) -> KernelResult {
        let caps = (
            self.extra_cap(inv, 0),
            self.extra_cap(inv, 1),
            self.extra_cap(inv, 2),
        );
        let (Some(croot), Some(vroot), Some(buffer), true) = (caps.0, caps.1, caps.2, inv.length >= 4)
        else {
            log::warn!("tcb: configure truncated");
            return Err(SyscallError::TruncatedMessage.into());
        };
        let fault_handler = self.syscall_arg(inv, 0);
        let croot_data = self.syscall_arg(inv, 1);
        let vroot_data = self.syscall_arg(inv, 2);
        let buffer_addr = self.syscall_arg(inv, 3);

        let ipc_buffer = self.decode_ipc_buffer_update(buffer_addr, buffer)?;
        let (croot, vroot) = self.decode_space_update(tcb, croot, croot_data, vroot, vroot_data)?;

        self.restart_invoker(inv);
        self.invoke_thread_control(
            inv,
            tcb,
            ThreadControl {
                fault_handler: Some(fault_handler),
                croot: Some(croot),
                vroot: Some(vroot),
                ipc_buffer: Some(ipc_buffer),
                ..ThreadControl::default()
            },
        )?;
        Ok(())
    }

    /// # ABI
    ///
    /// - MR0: fault handler CPtr
    /// - MR1: CSpace root data
    /// - MR2: VSpace root data
    /// - extra caps: CSpace root, VSpace root
    fn decode_set_space(&mut self, inv: &Invocation, tcb: ObjectRef) -> KernelResult {
        let caps = (self.extra_cap(inv, 0), self.extra_cap(inv, 1));
        let (Some(croot), Some(vroot), true) = (caps.0, caps.1, inv.length >= 3) else {
            return Err(SyscallError::TruncatedMessage.into());
        };
        let fault_handler = self.syscall_arg(inv, 0);
        let croot_data = self.syscall_arg(inv, 1);
        let vroot_data = self.syscall_arg(inv, 2);
        let (croot, vroot) = self.decode_space_update(tcb, croot, croot_data, vroot, vroot_data)?;

        self.restart_invoker(inv);
        self.invoke_thread_control(
            inv,
            tcb,
            ThreadControl {
                fault_handler: Some(fault_handler),
                croot: Some(croot),
                vroot: Some(vroot),
                ..ThreadControl::default()
            },
        )?;
        Ok(())
    }

    /// # ABI
    ///
    /// - MR0: IPC buffer address, 0 for none
    /// - extra cap 0: IPC buffer frame
    fn decode_set_ipc_buffer(&mut self, inv: &Invocation, tcb: ObjectRef) -> KernelResult {
        let buffer = self.extra_cap(inv, 0);
        let Some(buffer) = buffer.filter(|_| inv.length >= 1) else {
            return Err(SyscallError::TruncatedMessage.into());
        };
        let buffer_addr = self.syscall_arg(inv, 0);
        let ipc_buffer = self.decode_ipc_buffer_update(buffer_addr, buffer)?;

        self.restart_invoker(inv);
        self.invoke_thread_control(
            inv,
            tcb,
            ThreadControl {
                ipc_buffer: Some(ipc_buffer),
                ..ThreadControl::default()
            },
        )?;
        Ok(())
    }

    fn decode_ipc_buffer_update(
        &self,
        addr: u64,
        (cap, slot): (Cap, SlotRef),
    ) -> Result<(VirtAddr, Option<SlotUpdate>), SyscallError> {
        if addr == 0 {
            return Ok((VirtAddr(0), None));
        }
        let cap = self.derive_cap(slot, cap)?;
        check_valid_ipc_buffer(addr, cap)?;
        Ok((VirtAddr(addr), Some(SlotUpdate { cap, src: slot })))
    }

    /// Validate new CSpace and VSpace roots for `tcb`.
    fn decode_space_update(
        &self,
        tcb: ObjectRef,
        (croot_cap, croot_slot): (Cap, SlotRef),
        croot_data: u64,
        (vroot_cap, vroot_slot): (Cap, SlotRef),
        vroot_data: u64,
    ) -> Result<(SlotUpdate, SlotUpdate), SyscallError> {
        if self.slot_cap_long_running_delete(tcb_slot(tcb, TcbSlot::CTable))
            || self.slot_cap_long_running_delete(tcb_slot(tcb, TcbSlot::VTable))
        {
            log::warn!("tcb: roots of {} are being deleted", tcb);
            return Err(SyscallError::IllegalOperation);
        }

        let mut croot = croot_cap;
        if croot_data != 0 {
            croot = croot.update_data(false, croot_data);
        }
        let croot = self.derive_cap(croot_slot, croot)?;
        if !matches!(croot, Cap::CNode { .. }) {
            log::warn!("tcb: CSpace root {} is not a CNode", croot);
            return Err(SyscallError::IllegalOperation);
        }

        let mut vroot = vroot_cap;
        if vroot_data != 0 {
            vroot = vroot.update_data(false, vroot_data);
        }
        let vroot = self.derive_cap(vroot_slot, vroot)?;
        if !vroot.is_valid_vtable_root() {
            log::warn!("tcb: VSpace root {} is not a root table", vroot);
            return Err(SyscallError::IllegalOperation);
        }

        Ok((
            SlotUpdate {
                cap: croot,
                src: croot_slot,
            },
            SlotUpdate {
                cap: vroot,
                src: vroot_slot,
            },
        ))
    }

    /// Apply `control` to `tcb`.
    pub fn invoke_thread_control(
        &mut self,
        inv: &Invocation,
        tcb: ObjectRef,
        control: ThreadControl,
    ) -> Result<(), Preempted> {
        if let Some(mcp) = control.mcp {
            self.set_mcp(tcb, mcp);
        }
        if let Some(handler) = control.fault_handler {
            self.objects.tcb_mut(tcb).fault_handler = handler;
        }
        if let Some(update) = control.croot {
            self.replace_tcb_slot(inv, tcb, TcbSlot::CTable, update)?;
        }
        if let Some(update) = control.vroot {
            self.replace_tcb_slot(inv, tcb, TcbSlot::VTable, update)?;
        }
        if let Some((addr, update)) = control.ipc_buffer {
            let slot = tcb_slot(tcb, TcbSlot::IpcBuffer);
            self.cte_delete(slot, true)?;
            self.objects.tcb_mut(tcb).ipc_buffer = addr;
            if let Some(update) = update {
                self.install_if_unchanged(inv, slot, update);
            }
            if tcb == self.cur_thread() {
                self.reschedule_required();
            }
        }
        if let Some(priority) = control.priority {
            self.set_priority(tcb, priority);
        }
        Ok(())
    }

    fn replace_tcb_slot(
        &mut self,
        inv: &Invocation,
        tcb: ObjectRef,
        which: TcbSlot,
        update: SlotUpdate,
    ) -> Result<(), Preempted> {
        let slot = tcb_slot(tcb, which);
        self.cte_delete(slot, true)?;
        self.install_if_unchanged(inv, slot, update);
        Ok(())
    }

    /// Install `update` in `slot` unless its source or the invoked thread
    /// capability went away during the deletion.
    fn install_if_unchanged(&mut self, inv: &Invocation, slot: SlotRef, update: SlotUpdate) {
        let src_cap = self.objects.cte(update.src).cap;
        let invoked = self.objects.cte(inv.slot).cap;
        if self.objects.same_object_as(&update.cap, &src_cap)
            && self.objects.same_object_as(&inv.cap, &invoked)
        {
            self.objects.cte_insert(update.cap, update.src, slot);
        } else {
            log::debug!("tcb: {} went away, {} left empty", update.src, slot);
        }
    }

    // -- Scheduling parameters

    /// Maximum controlled priority of the authority in extra cap 0.
    fn authority_mcp(&self, inv: &Invocation) -> Result<u8, SyscallError> {
        match self.extra_cap(inv, 0) {
            None => Err(SyscallError::TruncatedMessage),
            Some((Cap::Thread { tcb }, _)) => Ok(self.objects.tcb(tcb).mcp),
            Some((other, _)) => {
                log::warn!("tcb: priority authority {} is not a thread", other);
                Err(SyscallError::InvalidCapability { argument: 1 })
            }
        }
    }

    /// # ABI
    ///
    /// - MR0: priority
    /// - extra cap 0: authority thread
    fn decode_set_priority(&mut self, inv: &Invocation, tcb: ObjectRef) -> KernelResult {
        if inv.length < 1 {
            return Err(SyscallError::TruncatedMessage.into());
        }
        let priority = self.syscall_arg(inv, 0);
        let mcp = self.authority_mcp(inv)?;
        let priority = check_priority(priority, mcp)?;

        self.restart_invoker(inv);
        self.invoke_thread_control(
            inv,
            tcb,
            ThreadControl {
                priority: Some(priority),
                ..ThreadControl::default()
            },
        )?;
        Ok(())
    }

    /// # ABI
    ///
    /// - MR0: maximum controlled priority
    /// - extra cap 0: authority thread
    fn decode_set_mc_priority(&mut self, inv: &Invocation, tcb: ObjectRef) -> KernelResult {
        if inv.length < 1 {
            return Err(SyscallError::TruncatedMessage.into());
        }
        let new_mcp = self.syscall_arg(inv, 0);
        let mcp = self.authority_mcp(inv)?;
        let new_mcp = check_priority(new_mcp, mcp)?;

        self.restart_invoker(inv);
        self.invoke_thread_control(
            inv,
            tcb,
            ThreadControl {
                mcp: Some(new_mcp),
                ..ThreadControl::default()
            },
        )?;
        Ok(())
    }

    /// # ABI
    ///
    /// - MR0: maximum controlled priority
    /// - MR1: priority
    /// - extra cap 0: authority thread
    fn decode_set_sched_params(&mut self, inv: &Invocation, tcb: ObjectRef) -> KernelResult {
        if inv.length < 2 {
            return Err(SyscallError::TruncatedMessage.into());
        }
        let new_mcp = self.syscall_arg(inv, 0);
        let priority = self.syscall_arg(inv, 1);
        let mcp = self.authority_mcp(inv)?;
        let new_mcp = check_priority(new_mcp, mcp)?;
        let priority = check_priority(priority, mcp)?;

        self.restart_invoker(inv);
        self.invoke_thread_control(
            inv,
            tcb,
            ThreadControl {
                mcp: Some(new_mcp),
                priority: Some(priority),
                ..ThreadControl::default()
            },
        )?;
        Ok(())
    }

    // -- Notifications

    /// # ABI
    ///
    /// - extra cap 0: notification to bind
    fn decode_bind_notification(&mut self, inv: &Invocation, tcb: ObjectRef) -> KernelResult {
        let Some((cap, _)) = self.extra_cap(inv, 0) else {
            return Err(SyscallError::TruncatedMessage.into());
        };
        if self.objects.tcb(tcb).bound_notification.is_valid() {
            log::warn!("tcb: {} already has a bound notification", tcb);
            return Err(SyscallError::IllegalOperation.into());
        }
        let ntfn = match cap {
            Cap::Notification { object, .. } if cap.can_receive() => object,
            other => {
                log::warn!("tcb: bind of {}", other);
                return Err(SyscallError::InvalidCapability { argument: 0 }.into());
            }
        };
        let notification = self.objects.notification(ntfn);
        if notification.state == NotificationState::Waiting || notification.bound_tcb.is_valid() {
            log::warn!("tcb: {} is in use", ntfn);
            return Err(SyscallError::IllegalOperation.into());
        }

        self.restart_invoker(inv);
        self.bind_notification(tcb, ntfn);
        Ok(())
    }
}

fn check_priority(priority: u64, mcp: u8) -> Result<u8, SyscallError> {
    if priority > u64::from(mcp) {
        log::warn!("tcb: priority {} above mcp {}", priority, mcp);
        return Err(SyscallError::RangeError {
            min: 0,
            max: u64::from(mcp),
        });
    }
    Ok(priority as u8)
}

/// An IPC buffer must be a normal-memory frame and aligned to the buffer
/// size.
fn check_valid_ipc_buffer(addr: u64, cap: Cap) -> Result<(), SyscallError> {
    match cap {
        Cap::Frame {
            is_device: false, ..
        } => {}
        other => {
            log::warn!("tcb: IPC buffer {} is not a memory frame", other);
            return Err(SyscallError::IllegalOperation);
        }
    }
    if !VirtAddr(addr).is_aligned(u32::from(IPC_BUFFER_SIZE_BITS)) {
        return Err(SyscallError::AlignmentError);
    }
    Ok(())
}
