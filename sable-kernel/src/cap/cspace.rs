//! CSpace lookups
//!
//! Every thread addresses capabilities through the CNode in its CTable
//! slot. Lookups performed on behalf of a syscall fail with a
//! [`LookupFault`]; the CNode invocations use
//! [`KernelState::lookup_slot_for_cnode_op`], which reports the failure as
//! a syscall error instead.

use sable_cap::{
    resolve_address_bits, Cap, LookupFault, ObjectRef, SlotRef, SlotStore, TcbSlot, VmRights,
    WORD_BITS,
};
use sable_common::{addr::mask, PhysAddr};
use sable_syscall::ipc_buffer::CAPS_OFFSET;
use sable_syscall::{MessageInfo, MAX_EXTRA_CAPS};

use crate::fault::Fault;
use crate::object::tcb::tcb_slot;
use crate::syscall::SyscallError;
use crate::KernelState;

/// Slots of the extra capabilities sent with a message.
pub type ExtraCaps = [Option<SlotRef>; MAX_EXTRA_CAPS as usize];

impl KernelState {
    /// Slot named by `cptr` in `thread`'s CSpace.
    pub fn lookup_slot(&self, thread: ObjectRef, cptr: u64) -> Result<SlotRef, LookupFault> {
        let root = self.objects.cte(tcb_slot(thread, TcbSlot::CTable)).cap;
        resolve_address_bits(&self.objects, root, cptr, WORD_BITS).map(|r| r.slot)
    }

    /// Capability named by `cptr` in `thread`'s CSpace.
    pub fn lookup_cap(&self, thread: ObjectRef, cptr: u64) -> Result<Cap, LookupFault> {
        self.lookup_cap_and_slot(thread, cptr).map(|(cap, _)| cap)
    }

    pub fn lookup_cap_and_slot(
        &self,
        thread: ObjectRef,
        cptr: u64,
    ) -> Result<(Cap, SlotRef), LookupFault> {
        let slot = self.lookup_slot(thread, cptr)?;
        Ok((self.objects.cte(slot).cap, slot))
    }

    /// Resolve exactly `depth` bits of `cptr` from the CNode `root`.
    pub fn lookup_slot_for_cnode_op(
        &self,
        is_source: bool,
        root: Cap,
        cptr: u64,
        depth: u64,
    ) -> Result<SlotRef, SyscallError> {
        if !matches!(root, Cap::CNode { .. }) {
            return Err(SyscallError::FailedLookup {
                source: is_source,
                lookup: LookupFault::InvalidRoot,
            });
        }
        if depth < 1 || depth > u64::from(WORD_BITS) {
            return Err(SyscallError::RangeError {
                min: 1,
                max: u64::from(WORD_BITS),
            });
        }
        let resolved = resolve_address_bits(&self.objects, root, cptr, depth as u32).map_err(
            |lookup| SyscallError::FailedLookup {
                source: is_source,
                lookup,
            },
        )?;
        if resolved.bits_remaining != 0 {
            return Err(SyscallError::depth_mismatch(is_source, resolved.bits_remaining));
        }
        Ok(resolved.slot)
    }

    pub fn lookup_source_slot(&self, root: Cap, cptr: u64, depth: u64) -> Result<SlotRef, SyscallError> {
        self.lookup_slot_for_cnode_op(true, root, cptr, depth)
    }

    pub fn lookup_target_slot(&self, root: Cap, cptr: u64, depth: u64) -> Result<SlotRef, SyscallError> {
        self.lookup_slot_for_cnode_op(false, root, cptr, depth)
    }

    pub fn lookup_pivot_slot(&self, root: Cap, cptr: u64, depth: u64) -> Result<SlotRef, SyscallError> {
        self.lookup_slot_for_cnode_op(true, root, cptr, depth)
    }

    /// Look up the extra capabilities `info` announces. Without an IPC
    /// buffer no extra capabilities are sent.
    pub fn lookup_extra_caps(
        &self,
        thread: ObjectRef,
        buffer: Option<PhysAddr>,
        info: MessageInfo,
    ) -> Result<ExtraCaps, Fault> {
        let mut caps: ExtraCaps = [None; MAX_EXTRA_CAPS as usize];
        let Some(buffer) = buffer else {
            return Ok(caps);
        };
        for (i, entry) in caps.iter_mut().enumerate().take(info.extra_caps as usize) {
            let cptr = self.read_buffer_word(buffer, CAPS_OFFSET + i);
            let slot = self.lookup_slot(thread, cptr).map_err(|lookup| Fault::CapFault {
                address: cptr,
                in_receive_phase: false,
                lookup,
            })?;
            *entry = Some(slot);
        }
        Ok(caps)
    }

    /// Physical address of `thread`'s IPC buffer, if it has a usable one.
    ///
    /// A sender may use a read-only buffer; a receiver needs write access.
    pub fn lookup_ipc_buffer(&self, is_receiver: bool, thread: ObjectRef) -> Option<PhysAddr> {
        let Cap::Frame {
            base,
            size_bits,
            rights,
            is_device: false,
            ..
        } = self.objects.cte(tcb_slot(thread, TcbSlot::IpcBuffer)).cap
        else {
            return None;
        };
        match rights {
            VmRights::ReadWrite => {}
            VmRights::ReadOnly if !is_receiver => {}
            _ => return None,
        }
        let offset = self.objects.tcb(thread).ipc_buffer.0 & mask(u32::from(size_bits));
        Some(base.offset(offset))
    }
}
