//! Root thread bootstrap
//!
//! Turns the memory description handed over by the platform into a running
//! kernel with one user thread holding authority over everything.
//!
//! # Bootstrap Sequence
//!
//! 1. Create the kernel state: idle threads and the IRQ node
//! 2. Carve the root CNode and root TCB out of free memory
//! 3. Install the well-known capabilities in the root CNode
//! 4. Turn all remaining free and device memory into untyped capabilities
//! 5. Make the root thread current and runnable
//!
//! The root CNode's guard covers every CPtr bit above the radix, so the
//! root thread addresses its slots by index.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use sable_cap::objects::{
    MAX_PRIORITY, MAX_UNTYPED_BITS, MIN_UNTYPED_BITS, PAGE_BITS, SLOT_BITS, TCB_BITS,
};
use sable_cap::root_slots::{Slot, FIRST_UNTYPED};
use sable_cap::{
    Cap, CdtOps, Cte, FrameMapping, MdbNode, MemRegion, ObjectRef, SlotRef, SlotStore, TcbSlot,
    ThreadState, VmRights, WORD_BITS,
};
use sable_common::{AlignedBlocks, PhysAddr, Region, RegionList, VirtAddr};

use crate::config::{ConfigError, KernelConfig};
use crate::machine::Machine;
use crate::object::context::{FAULT_IP, NEXT_IP};
use crate::object::tcb::tcb_slot;
use crate::object::{KernelObject, Tcb};
use crate::KernelState;

/// Memory and root-thread layout prepared by the platform.
#[derive(Clone, Debug)]
pub struct BootInfo {
    /// Free RAM, sorted by address.
    pub free: Vec<Region>,
    /// Device memory regions.
    pub device: Vec<Region>,
    /// Root table of the root thread's address space, already populated.
    pub vspace_root: PhysAddr,
    /// Physical frame of the root thread's IPC buffer.
    pub ipc_buffer: PhysAddr,
    /// Where that frame is mapped.
    pub ipc_buffer_vaddr: VirtAddr,
    /// Root thread entry point.
    pub entry: VirtAddr,
}

/// One untyped capability created at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UntypedDesc {
    /// Slot in the root CNode.
    pub slot: u32,
    pub base: PhysAddr,
    pub size_bits: u8,
    pub is_device: bool,
}

/// What boot handed to the root thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootSummary {
    pub root_tcb: ObjectRef,
    pub root_cnode: ObjectRef,
    pub untypeds: Vec<UntypedDesc>,
}

/// Bootstrap failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootError {
    /// The configuration was rejected.
    Config(ConfigError),
    /// More free regions than the region list holds.
    TooManyRegions,
    /// No free region fits the root CNode or TCB.
    OutOfMemory,
}

impl From<ConfigError> for BootError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "invalid configuration: {}", e),
            Self::TooManyRegions => f.write_str("too many free regions"),
            Self::OutOfMemory => f.write_str("not enough memory for the root thread"),
        }
    }
}

/// Boot the kernel and create the root thread.
pub fn boot_kernel(
    config: KernelConfig,
    machine: Box<dyn Machine>,
    info: &BootInfo,
) -> Result<(KernelState, BootSummary), BootError> {
    let radix = config.root_cnode_bits;
    let mut state = KernelState::new(config, machine)?;
    let mut free = RegionList::from_regions(&info.free).map_err(|_| BootError::TooManyRegions)?;

    // Root CNode
    let cnode_bits = radix + SLOT_BITS;
    let cnode_base = free
        .take_aligned(u32::from(cnode_bits))
        .ok_or(BootError::OutOfMemory)?;
    state.machine.clear_memory(cnode_base, cnode_bits);
    let root_cnode = state
        .objects
        .insert(
            Some(MemRegion {
                base: cnode_base,
                size_bits: cnode_bits,
            }),
            KernelObject::CNode(vec![Cte::EMPTY; 1usize << radix].into_boxed_slice()),
        )
        .ok_or(BootError::Config(ConfigError::ObjectTableCapacity))?;

    // Root TCB
    let tcb_base = free
        .take_aligned(u32::from(TCB_BITS))
        .ok_or(BootError::OutOfMemory)?;
    state.machine.clear_memory(tcb_base, TCB_BITS);
    let mut tcb = Tcb::new(state.cur_domain(), state.config.time_slice, 0);
    tcb.priority = MAX_PRIORITY;
    tcb.mcp = MAX_PRIORITY;
    tcb.ipc_buffer = info.ipc_buffer_vaddr;
    let root_tcb = state
        .objects
        .insert(
            Some(MemRegion {
                base: tcb_base,
                size_bits: TCB_BITS,
            }),
            KernelObject::Tcb(Box::new(tcb)),
        )
        .ok_or(BootError::Config(ConfigError::ObjectTableCapacity))?;
    log::debug!(
        "boot: root CNode {} at {}, TCB {} at {}",
        root_cnode,
        cnode_base,
        root_tcb,
        tcb_base
    );

    // Well-known capabilities
    let slot = |s: Slot| SlotRef::new(root_cnode, s.index());
    let cnode_cap = Cap::CNode {
        object: root_cnode,
        radix,
        guard_size: (WORD_BITS - u32::from(radix)) as u8,
        guard: 0,
    };
    let vspace_cap = Cap::PageTable {
        base: info.vspace_root,
        is_root: true,
        mapping: None,
    };
    let ipc_buffer_cap = Cap::Frame {
        base: info.ipc_buffer,
        size_bits: PAGE_BITS,
        rights: VmRights::ReadWrite,
        is_device: false,
        mapping: Some(FrameMapping {
            vspace: info.vspace_root,
            vaddr: info.ipc_buffer_vaddr,
        }),
    };
    state.write_root_slot(slot(Slot::InitThreadCNode), cnode_cap);
    state.write_root_slot(slot(Slot::InitThreadVSpace), vspace_cap);
    state.write_root_slot(slot(Slot::InitThreadIpcBuffer), ipc_buffer_cap);
    state.write_root_slot(slot(Slot::InitThreadTcb), Cap::Thread { tcb: root_tcb });
    state.write_root_slot(slot(Slot::IrqControl), Cap::IrqControl);
    state.write_root_slot(slot(Slot::Domain), Cap::Domain);

    state.objects.cte_insert(
        cnode_cap,
        slot(Slot::InitThreadCNode),
        tcb_slot(root_tcb, TcbSlot::CTable),
    );
    state.objects.cte_insert(
        vspace_cap,
        slot(Slot::InitThreadVSpace),
        tcb_slot(root_tcb, TcbSlot::VTable),
    );
    state.objects.cte_insert(
        ipc_buffer_cap,
        slot(Slot::InitThreadIpcBuffer),
        tcb_slot(root_tcb, TcbSlot::IpcBuffer),
    );

    // Untyped memory
    let slot_count = 1u32 << radix;
    let mut untypeds = Vec::new();
    let regions = free
        .iter()
        .map(|r| (*r, false))
        .chain(info.device.iter().map(|r| (*r, true)));
    'regions: for (region, is_device) in regions {
        let blocks = AlignedBlocks::new(
            region,
            u32::from(MIN_UNTYPED_BITS),
            u32::from(MAX_UNTYPED_BITS),
        );
        for (base, bits) in blocks {
            let index = FIRST_UNTYPED + untypeds.len() as u32;
            if index >= slot_count {
                log::warn!("boot: root CNode full, dropping memory from {}", base);
                break 'regions;
            }
            let size_bits = bits as u8;
            state.write_root_slot(
                SlotRef::new(root_cnode, index),
                Cap::Untyped {
                    base,
                    size_bits,
                    free_offset: 0,
                    is_device,
                },
            );
            untypeds.push(UntypedDesc {
                slot: index,
                base,
                size_bits,
                is_device,
            });
        }
    }
    log::debug!("boot: {} untyped capabilities", untypeds.len());

    // Root thread
    state.setup_reply_master(root_tcb);
    {
        let ctx = &mut state.objects.tcb_mut(root_tcb).context;
        ctx.set(NEXT_IP, info.entry.0);
        ctx.set(FAULT_IP, info.entry.0);
    }
    state.objects.tcb_mut(root_tcb).state = ThreadState::Running;
    state.switch_to_thread(root_tcb);

    log::info!("boot: root thread {} enters at {}", root_tcb, info.entry);
    Ok((
        state,
        BootSummary {
            root_tcb,
            root_cnode,
            untypeds,
        },
    ))
}

impl KernelState {
    /// Store an original capability in an empty boot-time slot.
    fn write_root_slot(&mut self, slot: SlotRef, cap: Cap) {
        debug_assert!(self.objects.cte(slot).is_empty(), "boot slot {slot} reused");
        *self.objects.cte_mut(slot) = Cte {
            cap,
            mdb: MdbNode {
                revocable: true,
                first_badged: true,
                ..MdbNode::NULL
            },
        };
    }
}
