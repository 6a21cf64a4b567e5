//! Hardware interface
//!
//! The kernel core never touches hardware directly. Physical memory, the
//! interrupt controller, inter-processor interrupts and the page-table
//! walker are reached through [`Machine`], owned by the kernel state as a
//! trait object so the same core runs on real hardware and under test.

use sable_cap::{IrqNumber, VmRights};
use sable_common::{PhysAddr, VirtAddr};

/// Exclusive top of the user virtual address range.
pub const USER_TOP: u64 = 1 << 47;

/// Inter-processor interrupt kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ipi {
    /// Re-run the scheduler on the target core.
    Reschedule,
    /// The target core's current thread was taken off the CPU.
    Stall,
}

/// Why a translation-table walk stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappingError {
    /// An intermediate table is missing; `bits_left` address bits were
    /// still unresolved.
    MissingTable {
        /// Address bits left unresolved.
        bits_left: u32,
    },
    /// Something is already mapped at the target entry.
    AlreadyMapped,
}

/// Platform services consumed by the kernel.
pub trait Machine: Send {
    /// Read a word of physical memory.
    fn read_word(&self, addr: PhysAddr) -> u64;

    /// Write a word of physical memory.
    fn write_word(&mut self, addr: PhysAddr, value: u64);

    /// Zero `2^size_bits` bytes at `base`.
    fn clear_memory(&mut self, base: PhysAddr, size_bits: u8);

    /// Claim the highest-priority pending interrupt, if any.
    fn active_irq(&mut self) -> Option<IrqNumber>;

    /// Whether an interrupt is pending, without claiming it.
    fn is_irq_pending(&self) -> bool;

    /// Mask or unmask an interrupt line.
    fn mask_irq(&mut self, irq: IrqNumber, masked: bool);

    /// Signal end of interrupt to the controller.
    fn ack_irq(&mut self, irq: IrqNumber);

    /// Re-arm the scheduler timer.
    fn reset_timer(&mut self);

    /// Send an IPI to every core set in `mask`.
    fn send_ipi(&mut self, mask: u64, ipi: Ipi);

    /// Walk `vspace` to the entry that would map `2^size_bits` bytes at
    /// `vaddr`, and check that it is free.
    fn lookup(&self, vspace: PhysAddr, vaddr: VirtAddr, size_bits: u8) -> Result<(), MappingError>;

    /// Install a frame mapping. Call only after [`Machine::lookup`] succeeded.
    fn map_frame(
        &mut self,
        vspace: PhysAddr,
        vaddr: VirtAddr,
        frame: PhysAddr,
        size_bits: u8,
        rights: VmRights,
    );

    /// Remove a frame mapping, if it still maps `frame`.
    fn unmap_frame(&mut self, vspace: PhysAddr, vaddr: VirtAddr, frame: PhysAddr);

    /// Install a page table covering `vaddr`.
    fn map_page_table(&mut self, vspace: PhysAddr, vaddr: VirtAddr, table: PhysAddr);

    /// Remove a page table, if it is still installed at `vaddr`.
    fn unmap_page_table(&mut self, vspace: PhysAddr, vaddr: VirtAddr, table: PhysAddr);

    /// Switch the current core to `root`, or to the kernel-only address
    /// space when `None`.
    fn set_vspace_root(&mut self, root: Option<PhysAddr>);
}
