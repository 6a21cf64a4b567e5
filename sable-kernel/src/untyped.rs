//! Untyped memory
//!
//! Every kernel object is carved out of an untyped region by Retype. An
//! untyped capability carries a free cursor; retype places objects at the
//! cursor, aligned to the object size, and moves the cursor past them.
//! The cursor only returns to zero when the region is reset, which happens
//! automatically on the next retype once nothing derived from the region
//! is left.
//!
//! # Reset
//!
//! Reset zeroes the used part of the region in chunks of
//! `2^reset_chunk_bits` bytes, from the top down, with a preemption point
//! after each chunk. The cursor follows the cleared boundary, so a
//! preempted reset resumes where it stopped. Device regions are never
//! zeroed.

use alloc::boxed::Box;
use alloc::vec;

use sable_cap::objects::{untyped, MAX_UNTYPED_BITS, MIN_UNTYPED_BITS, PAGE_TABLE_BITS};
use sable_cap::{
    Badge, Cap, CapRights, CdtOps, Cte, EndpointObject, LookupFault, MemRegion,
    NotificationObject, ObjectRef, ObjectType, SlotRef, SlotStore, VmRights, WORD_BITS,
};
use sable_common::addr::mask;
use sable_common::PhysAddr;
use sable_syscall::InvocationLabel;

use crate::object::{KernelObject, Tcb};
use crate::syscall::invocation::Invocation;
use crate::syscall::SyscallError;
use crate::{KernelResult, KernelState, Preempted};

/// A validated retype request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Retype {
    pub object_type: ObjectType,
    /// Size argument: log2 bytes for untyped, radix for a CNode.
    pub user_size: u64,
    /// First destination slot; the others follow it.
    pub dest: SlotRef,
    pub count: u64,
    /// Offset of the first object in the region, already aligned.
    pub offset: u64,
    /// The region must be reset first.
    pub reset: bool,
}

/// Whether objects of this type live in the object table.
const fn has_kernel_object(ty: ObjectType) -> bool {
    matches!(
        ty,
        ObjectType::Tcb | ObjectType::Endpoint | ObjectType::Notification | ObjectType::CapTable
    )
}

impl KernelState {
    /// Decode an untyped invocation.
    ///
    /// # ABI
    ///
    /// - MR0: object type
    /// - MR1: size argument
    /// - MR2: index of the destination CNode, from extra cap 0
    /// - MR3: depth of that lookup; 0 uses extra cap 0 itself
    /// - MR4: first destination slot
    /// - MR5: number of objects
    pub(crate) fn decode_untyped_invocation(&mut self, inv: &Invocation) -> KernelResult {
        if inv.label != InvocationLabel::UntypedRetype {
            log::warn!("untyped: illegal operation {}", inv.label.name());
            return Err(SyscallError::IllegalOperation.into());
        }
        let root = self.extra_cap(inv, 0);
        let (Some((root_cap, root_slot)), true) = (root, inv.length >= 6) else {
            log::warn!("untyped: truncated message");
            return Err(SyscallError::TruncatedMessage.into());
        };
        let Cap::Untyped {
            base,
            size_bits,
            free_offset,
            is_device,
        } = inv.cap
        else {
            return Err(SyscallError::IllegalOperation.into());
        };

        let new_type = self.syscall_arg(inv, 0);
        let user_size = self.syscall_arg(inv, 1);
        let node_index = self.syscall_arg(inv, 2);
        let node_depth = self.syscall_arg(inv, 3);
        let node_offset = self.syscall_arg(inv, 4);
        let node_window = self.syscall_arg(inv, 5);

        let Some(object_type) = ObjectType::from_word(new_type) else {
            log::warn!("untyped: bad object type {}", new_type);
            return Err(SyscallError::InvalidArgument { argument: 0 }.into());
        };
        if user_size >= u64::from(WORD_BITS) {
            return Err(SyscallError::RangeError {
                min: 0,
                max: u64::from(WORD_BITS - 1),
            }
            .into());
        }
        if object_type == ObjectType::CapTable && user_size == 0 {
            return Err(SyscallError::InvalidArgument { argument: 1 }.into());
        }
        let max_radix = u64::from(self.config.max_cnode_radix);
        if object_type == ObjectType::CapTable && user_size > max_radix {
            log::warn!("untyped: CNode radix {} above {}", user_size, max_radix);
            return Err(SyscallError::RangeError {
                min: 1,
                max: max_radix,
            }
            .into());
        }
        if object_type.size_bits(user_size) > u64::from(MAX_UNTYPED_BITS) {
            return Err(SyscallError::RangeError {
                min: 0,
                max: u64::from(MAX_UNTYPED_BITS),
            }
            .into());
        }
        if object_type == ObjectType::Untyped && user_size < u64::from(MIN_UNTYPED_BITS) {
            return Err(SyscallError::InvalidArgument { argument: 1 }.into());
        }

        let dest_node = if node_depth == 0 {
            root_slot
        } else {
            self.lookup_target_slot(root_cap, node_index, node_depth)?
        };
        let Cap::CNode {
            object: cnode,
            radix,
            ..
        } = self.objects.cte(dest_node).cap
        else {
            log::warn!("untyped: destination is not a CNode");
            return Err(SyscallError::FailedLookup {
                source: false,
                lookup: LookupFault::MissingCapability {
                    bits_left: node_depth as u32,
                },
            }
            .into());
        };

        let node_size = 1u64 << radix;
        if node_offset > node_size - 1 {
            return Err(SyscallError::RangeError {
                min: 0,
                max: node_size - 1,
            }
            .into());
        }
        let fan_out = self.config.retype_fan_out_limit;
        if node_window < 1 || node_window > fan_out {
            return Err(SyscallError::RangeError { min: 1, max: fan_out }.into());
        }
        if node_window > node_size - node_offset {
            return Err(SyscallError::RangeError {
                min: 1,
                max: node_size - node_offset,
            }
            .into());
        }
        for i in node_offset..node_offset + node_window {
            if let Err(e) = self.objects.ensure_empty_slot(SlotRef::new(cnode, i as u32)) {
                log::warn!("untyped: destination slot {} is occupied", i);
                return Err(e.into());
            }
        }

        let reset = self.objects.ensure_no_children(inv.slot).is_ok();
        let free_offset = if reset { 0 } else { free_offset };
        let obj_bits = object_type.size_bits(user_size);
        if !untyped::fits(size_bits, free_offset, obj_bits, node_window) {
            let available = untyped::free_bytes(size_bits, free_offset);
            log::warn!(
                "untyped: {} x {} needs more than {} bytes",
                node_window,
                object_type,
                available
            );
            return Err(SyscallError::NotEnoughMemory { available }.into());
        }
        if is_device && !object_type.is_frame_type() && object_type != ObjectType::Untyped {
            log::warn!("untyped: {} from device memory", object_type);
            return Err(SyscallError::InvalidArgument { argument: 1 }.into());
        }
        if has_kernel_object(object_type) {
            let mut available = self.objects.available();
            if reset {
                available += self.objects.count_region(MemRegion { base, size_bits });
            }
            let available = available as u64;
            if available < node_window {
                return Err(SyscallError::RangeError {
                    min: 1,
                    max: available,
                }
                .into());
            }
        }

        let retype = Retype {
            object_type,
            user_size,
            dest: SlotRef::new(cnode, node_offset as u32),
            count: node_window,
            offset: untyped::aligned_offset(free_offset, obj_bits),
            reset,
        };
        self.restart_invoker(inv);
        self.invoke_untyped_retype(inv.slot, retype)?;
        Ok(())
    }

    /// Create the objects of a validated retype from the untyped in `src`.
    pub fn invoke_untyped_retype(&mut self, src: SlotRef, retype: Retype) -> Result<(), Preempted> {
        if retype.reset {
            self.reset_untyped_cap(src)?;
        }
        let Cap::Untyped {
            base, is_device, ..
        } = self.objects.cte(src).cap
        else {
            panic!("retype from {src}, which holds no untyped");
        };
        let obj_bits = retype.object_type.size_bits(retype.user_size);
        let next = retype.offset + (retype.count << obj_bits);
        self.set_untyped_free_offset(src, next);

        for i in 0..retype.count {
            let addr = base.offset(retype.offset + (i << obj_bits));
            let cap = self.create_object(retype.object_type, addr, retype.user_size, is_device);
            self.objects
                .insert_new_cap(src, retype.dest.offset(i as u32), cap);
        }
        log::debug!(
            "untyped: {} x {} at {} (cursor {:#x})",
            retype.count,
            retype.object_type,
            base.offset(retype.offset),
            next
        );
        Ok(())
    }

    fn set_untyped_free_offset(&mut self, slot: SlotRef, offset: u64) {
        if let Cap::Untyped { free_offset, .. } = &mut self.objects.cte_mut(slot).cap {
            *free_offset = offset;
        }
    }

    /// Return the untyped in `slot` to its pristine state.
    pub fn reset_untyped_cap(&mut self, slot: SlotRef) -> Result<(), Preempted> {
        let Cap::Untyped {
            base,
            size_bits,
            free_offset,
            is_device,
        } = self.objects.cte(slot).cap
        else {
            panic!("reset of {slot}, which holds no untyped");
        };
        if free_offset == 0 {
            return Ok(());
        }

        let released = self.objects.release_region(MemRegion { base, size_bits });
        log::debug!("untyped: reset {} ({} objects released)", base, released);

        let chunk = self.config.reset_chunk_bits;
        if is_device || size_bits < chunk {
            if !is_device {
                self.machine.clear_memory(base, size_bits);
            }
            self.set_untyped_free_offset(slot, 0);
            return Ok(());
        }

        let mut offset = (free_offset - 1) & !mask(u32::from(chunk));
        loop {
            self.machine.clear_memory(base.offset(offset), chunk);
            self.set_untyped_free_offset(slot, offset);
            self.preemption_point()?;
            if offset == 0 {
                return Ok(());
            }
            offset -= 1 << chunk;
        }
    }

    /// Create one object at `base` and return the original capability to it.
    pub fn create_object(
        &mut self,
        object_type: ObjectType,
        base: PhysAddr,
        user_size: u64,
        is_device: bool,
    ) -> Cap {
        let obj_bits = object_type.size_bits(user_size) as u8;
        let region = Some(MemRegion {
            base,
            size_bits: obj_bits,
        });
        match object_type {
            ObjectType::Untyped => Cap::Untyped {
                base,
                size_bits: obj_bits,
                free_offset: 0,
                is_device,
            },
            ObjectType::Tcb => {
                let tcb = Tcb::new(self.cur_domain(), self.config.time_slice, self.current_node);
                Cap::Thread {
                    tcb: self.insert_object(region, KernelObject::Tcb(Box::new(tcb))),
                }
            }
            ObjectType::Endpoint => Cap::Endpoint {
                object: self.insert_object(
                    region,
                    KernelObject::Endpoint(EndpointObject::new()),
                ),
                badge: Badge::NONE,
                rights: CapRights::ALL,
            },
            ObjectType::Notification => Cap::Notification {
                object: self.insert_object(
                    region,
                    KernelObject::Notification(NotificationObject::new()),
                ),
                badge: Badge::NONE,
                rights: CapRights::RW,
            },
            ObjectType::CapTable => {
                let slots = vec![Cte::EMPTY; 1usize << user_size].into_boxed_slice();
                Cap::CNode {
                    object: self.insert_object(region, KernelObject::CNode(slots)),
                    radix: user_size as u8,
                    guard_size: 0,
                    guard: 0,
                }
            }
            ObjectType::Frame | ObjectType::LargeFrame => {
                if !is_device {
                    self.machine.clear_memory(base, obj_bits);
                }
                Cap::Frame {
                    base,
                    size_bits: obj_bits,
                    rights: VmRights::ReadWrite,
                    is_device,
                    mapping: None,
                }
            }
            ObjectType::PageTable | ObjectType::VSpace => {
                self.machine.clear_memory(base, PAGE_TABLE_BITS);
                Cap::PageTable {
                    base,
                    is_root: object_type == ObjectType::VSpace,
                    mapping: None,
                }
            }
        }
    }

    fn insert_object(&mut self, region: Option<MemRegion>, body: KernelObject) -> ObjectRef {
        match self.objects.insert(region, body) {
            Some(r) => r,
            None => panic!("object table exhausted after retype validation"),
        }
    }
}
