//! Address space invocations
//!
//! - Frame: Map, Unmap, GetAddress
//! - PageTable: Map, Unmap
//!
//! The page-table walker belongs to the platform; these decoders check
//! capabilities and arguments and record each mapping in the capability,
//! so that deleting the capability can undo it.

use sable_cap::objects::{PAGE_BITS, PAGE_TABLE_BITS};
use sable_cap::{
    Cap, CapRights, CdtOps, FrameMapping, LookupFault, SlotRef, SlotStore, ThreadState,
};
use sable_common::addr::mask;
use sable_common::{PhysAddr, VirtAddr};
use sable_syscall::{InvocationLabel, MessageInfo};

use super::invocation::Invocation;
use super::SyscallError;
use crate::machine::{MappingError, USER_TOP};
use crate::object::context::{BADGE_REG, MSG_INFO_REG};
use crate::{KernelResult, KernelState};

/// VSpace root named by extra cap 0, reported as invalid capability 1.
fn vspace_root(cap: Option<(Cap, SlotRef)>) -> Result<PhysAddr, SyscallError> {
    match cap.map(|(cap, _)| cap) {
        Some(Cap::PageTable {
            base,
            is_root: true,
            ..
        }) => Ok(base),
        Some(other) => {
            log::warn!("vspace: {} is not a VSpace root", other);
            Err(SyscallError::InvalidCapability { argument: 1 })
        }
        None => Err(SyscallError::TruncatedMessage),
    }
}

fn lookup_error(error: MappingError) -> SyscallError {
    match error {
        MappingError::MissingTable { bits_left } => SyscallError::FailedLookup {
            source: false,
            lookup: LookupFault::MissingCapability { bits_left },
        },
        MappingError::AlreadyMapped => SyscallError::DeleteFirst,
    }
}

impl KernelState {
    pub(crate) fn decode_frame_invocation(&mut self, inv: &Invocation) -> KernelResult {
        let Cap::Frame {
            base,
            size_bits,
            rights,
            is_device,
            mapping,
        } = inv.cap
        else {
            return Err(SyscallError::IllegalOperation.into());
        };

        match inv.label {
            InvocationLabel::FrameMap => {
                if inv.length < 3 || inv.extra_caps[0].is_none() {
                    return Err(SyscallError::TruncatedMessage.into());
                }
                let vaddr = self.syscall_arg(inv, 0);
                let rights_mask = CapRights::from_word(self.syscall_arg(inv, 1));
                let attributes = self.syscall_arg(inv, 2);
                let vspace = vspace_root(self.extra_cap(inv, 0))?;

                let vtop = vaddr.wrapping_add(1 << size_bits);
                if vaddr >= USER_TOP || vtop > USER_TOP || vtop < vaddr {
                    log::warn!("frame: {:#x} is outside user space", vaddr);
                    return Err(SyscallError::InvalidArgument { argument: 0 }.into());
                }
                let vaddr = VirtAddr(vaddr);
                if !vaddr.is_aligned(u32::from(size_bits)) {
                    return Err(SyscallError::AlignmentError.into());
                }

                match mapping {
                    Some(m) if m.vspace != vspace => {
                        log::warn!("frame: {} is mapped in another address space", base);
                        return Err(SyscallError::InvalidCapability { argument: 1 }.into());
                    }
                    Some(m) if m.vaddr != vaddr => {
                        log::warn!("frame: {} is already mapped at {}", base, m.vaddr);
                        return Err(SyscallError::InvalidArgument { argument: 0 }.into());
                    }
                    // Remapping in place only changes the rights.
                    Some(_) => {}
                    None => self
                        .machine
                        .lookup(vspace, vaddr, size_bits)
                        .map_err(lookup_error)?,
                }
                let vm_rights = rights.mask(rights_mask);

                self.restart_invoker(inv);
                log::debug!(
                    "frame: map {} at {} ({:?}{}, attributes {:#x})",
                    base,
                    vaddr,
                    vm_rights,
                    if is_device { ", device" } else { "" },
                    attributes
                );
                self.machine.map_frame(vspace, vaddr, base, size_bits, vm_rights);
                self.set_slot_mapping(inv, Some(FrameMapping { vspace, vaddr }));
                Ok(())
            }
            InvocationLabel::FrameUnmap => {
                self.restart_invoker(inv);
                if let Some(m) = mapping {
                    self.machine.unmap_frame(m.vspace, m.vaddr, base);
                }
                self.set_slot_mapping(inv, None);
                Ok(())
            }
            InvocationLabel::FrameGetAddress => {
                self.restart_invoker(inv);
                if inv.is_call {
                    let buffer = self.lookup_ipc_buffer(true, inv.thread);
                    let length = self.set_mr(inv.thread, buffer, 0, base.as_u64());
                    let info = MessageInfo::new(0, 0, 0, length as u64);
                    let ctx = &mut self.objects.tcb_mut(inv.thread).context;
                    ctx.set(BADGE_REG, 0);
                    ctx.set(MSG_INFO_REG, info.to_word());
                }
                self.set_thread_state(inv.thread, ThreadState::Running);
                Ok(())
            }
            other => {
                log::warn!("frame: illegal operation {}", other.name());
                Err(SyscallError::IllegalOperation.into())
            }
        }
    }

    pub(crate) fn decode_page_table_invocation(&mut self, inv: &Invocation) -> KernelResult {
        let Cap::PageTable {
            base,
            is_root,
            mapping,
        } = inv.cap
        else {
            return Err(SyscallError::IllegalOperation.into());
        };

        match inv.label {
            InvocationLabel::PageTableUnmap => {
                if !self.objects.is_final_capability(inv.slot) {
                    log::warn!("page table: {} has other capabilities", base);
                    return Err(SyscallError::RevokeFirst.into());
                }
                if is_root {
                    return Err(SyscallError::IllegalOperation.into());
                }
                self.restart_invoker(inv);
                if let Some(m) = mapping {
                    self.machine.unmap_page_table(m.vspace, m.vaddr, base);
                    self.machine.clear_memory(base, PAGE_TABLE_BITS);
                }
                self.set_slot_mapping(inv, None);
                Ok(())
            }
            InvocationLabel::PageTableMap => {
                if inv.length < 2 || inv.extra_caps[0].is_none() {
                    return Err(SyscallError::TruncatedMessage.into());
                }
                if is_root {
                    log::warn!("page table: {} is a VSpace root", base);
                    return Err(SyscallError::IllegalOperation.into());
                }
                if mapping.is_some() {
                    log::warn!("page table: {} is already mapped", base);
                    return Err(SyscallError::InvalidCapability { argument: 0 }.into());
                }
                let vaddr = self.syscall_arg(inv, 0);
                let attributes = self.syscall_arg(inv, 1);
                let vspace = vspace_root(self.extra_cap(inv, 0))?;
                if vaddr >= USER_TOP {
                    return Err(SyscallError::InvalidArgument { argument: 0 }.into());
                }

                let bits = match self.machine.lookup(vspace, VirtAddr(vaddr), PAGE_BITS) {
                    Ok(()) | Err(MappingError::AlreadyMapped) => {
                        log::warn!("page table: {:#x} is already covered", vaddr);
                        return Err(SyscallError::DeleteFirst.into());
                    }
                    Err(MappingError::MissingTable { bits_left }) => bits_left,
                };
                let vaddr = VirtAddr(vaddr & !mask(bits));

                self.restart_invoker(inv);
                log::debug!(
                    "page table: map {} at {} (attributes {:#x})",
                    base,
                    vaddr,
                    attributes
                );
                self.machine.map_page_table(vspace, vaddr, base);
                self.set_slot_mapping(inv, Some(FrameMapping { vspace, vaddr }));
                Ok(())
            }
            other => {
                log::warn!("page table: illegal operation {}", other.name());
                Err(SyscallError::IllegalOperation.into())
            }
        }
    }

    /// Record the mapping of the frame or page table in the invoked slot.
    fn set_slot_mapping(&mut self, inv: &Invocation, new: Option<FrameMapping>) {
        match &mut self.objects.cte_mut(inv.slot).cap {
            Cap::Frame { mapping, .. } | Cap::PageTable { mapping, .. } => *mapping = new,
            other => panic!("mapping recorded in {} holding {other}", inv.slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vspace_root_must_be_root_table() {
        let slot = SlotRef::new(sable_cap::ObjectRef::from_index(1), 0);
        let root = Cap::PageTable {
            base: PhysAddr(0x4000),
            is_root: true,
            mapping: None,
        };
        let table = Cap::PageTable {
            base: PhysAddr(0x5000),
            is_root: false,
            mapping: None,
        };
        assert_eq!(vspace_root(Some((root, slot))), Ok(PhysAddr(0x4000)));
        assert_eq!(
            vspace_root(Some((table, slot))),
            Err(SyscallError::InvalidCapability { argument: 1 })
        );
        assert_eq!(vspace_root(None), Err(SyscallError::TruncatedMessage));
    }

    #[test]
    fn test_missing_table_is_a_failed_lookup() {
        assert_eq!(
            lookup_error(MappingError::MissingTable { bits_left: 21 }),
            SyscallError::FailedLookup {
                source: false,
                lookup: LookupFault::MissingCapability { bits_left: 21 },
            }
        );
        assert_eq!(lookup_error(MappingError::AlreadyMapped), SyscallError::DeleteFirst);
    }
}
