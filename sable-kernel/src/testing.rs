//! Test harness: a recording machine and a booted kernel.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use sable_cap::root_slots::Slot;
use sable_cap::{
    Cap, CdtOps, IrqNumber, ObjectRef, ObjectType, SlotRef, SlotStore, TcbSlot, ThreadState,
    VmRights,
};
use sable_common::addr::mask;
use sable_common::{PhysAddr, Region, VirtAddr};
use sable_syscall::ipc_buffer::{CAPS_OFFSET, MSG_OFFSET};
use sable_syscall::{InvocationLabel, MessageInfo, Syscall, N_MSG_REGISTERS};

use crate::boot::{boot_kernel, BootInfo, BootSummary};
use crate::config::KernelConfig;
use crate::machine::{Ipi, Machine, MappingError};
use crate::object::context::{CAP_REG, MSG_INFO_REG, MSG_REGISTERS};
use crate::object::tcb::tcb_slot;
use crate::KernelState;

const LARGE_BITS: u32 = 21;

/// Everything the mock machine observed.
#[derive(Default)]
pub struct MockState {
    pub memory: BTreeMap<u64, u64>,
    pub cleared: Vec<(PhysAddr, u8)>,
    pub pending: VecDeque<IrqNumber>,
    pub masked: BTreeSet<u16>,
    pub acked: Vec<IrqNumber>,
    pub ipis: Vec<(u64, Ipi)>,
    pub timer_resets: usize,
    /// Second-level tables, keyed by (vspace, vaddr >> 21).
    pub page_tables: BTreeMap<(u64, u64), PhysAddr>,
    /// Frames, keyed by (vspace, vaddr).
    pub frames: BTreeMap<(u64, u64), (PhysAddr, u8, VmRights)>,
    pub vspace_root: Option<PhysAddr>,
}

impl MockState {
    pub fn is_masked(&self, irq: IrqNumber) -> bool {
        self.masked.contains(&irq.0)
    }

    pub fn raise_irq(&mut self, irq: IrqNumber) {
        self.pending.push_back(irq);
    }

    pub fn acked(&self) -> &[IrqNumber] {
        &self.acked
    }

    pub fn timer_resets(&self) -> usize {
        self.timer_resets
    }
}

/// Machine double shared between the kernel and the test.
#[derive(Clone, Default)]
pub struct MockMachine(Arc<spin::Mutex<MockState>>);

impl MockMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> spin::MutexGuard<'_, MockState> {
        self.0.lock()
    }
}

impl Machine for MockMachine {
    fn read_word(&self, addr: PhysAddr) -> u64 {
        self.0.lock().memory.get(&addr.0).copied().unwrap_or(0)
    }

    fn write_word(&mut self, addr: PhysAddr, value: u64) {
        self.0.lock().memory.insert(addr.0, value);
    }

    fn clear_memory(&mut self, base: PhysAddr, size_bits: u8) {
        let mut s = self.0.lock();
        let end = base.0 + (1u64 << size_bits);
        s.memory.retain(|addr, _| *addr < base.0 || *addr >= end);
        s.cleared.push((base, size_bits));
    }

    fn active_irq(&mut self) -> Option<IrqNumber> {
        self.0.lock().pending.pop_front()
    }

    fn is_irq_pending(&self) -> bool {
        !self.0.lock().pending.is_empty()
    }

    fn mask_irq(&mut self, irq: IrqNumber, masked: bool) {
        let mut s = self.0.lock();
        if masked {
            s.masked.insert(irq.0);
        } else {
            s.masked.remove(&irq.0);
        }
    }

    fn ack_irq(&mut self, irq: IrqNumber) {
        self.0.lock().acked.push(irq);
    }

    fn reset_timer(&mut self) {
        self.0.lock().timer_resets += 1;
    }

    fn send_ipi(&mut self, mask: u64, ipi: Ipi) {
        self.0.lock().ipis.push((mask, ipi));
    }

    fn lookup(&self, vspace: PhysAddr, vaddr: VirtAddr, size_bits: u8) -> Result<(), MappingError> {
        let s = self.0.lock();
        let large = vaddr.0 & !mask(LARGE_BITS);
        let table = s.page_tables.contains_key(&(vspace.0, vaddr.0 >> LARGE_BITS));
        let large_frame = s.frames.contains_key(&(vspace.0, large));
        if u32::from(size_bits) >= LARGE_BITS {
            return if table || large_frame {
                Err(MappingError::AlreadyMapped)
            } else {
                Ok(())
            };
        }
        if large_frame {
            return Err(MappingError::AlreadyMapped);
        }
        if !table {
            return Err(MappingError::MissingTable {
                bits_left: LARGE_BITS,
            });
        }
        if s.frames.contains_key(&(vspace.0, vaddr.0)) {
            Err(MappingError::AlreadyMapped)
        } else {
            Ok(())
        }
    }

    fn map_frame(
        &mut self,
        vspace: PhysAddr,
        vaddr: VirtAddr,
        frame: PhysAddr,
        size_bits: u8,
        rights: VmRights,
    ) {
        self.0
            .lock()
            .frames
            .insert((vspace.0, vaddr.0), (frame, size_bits, rights));
    }

    fn unmap_frame(&mut self, vspace: PhysAddr, vaddr: VirtAddr, frame: PhysAddr) {
        let mut s = self.0.lock();
        if matches!(s.frames.get(&(vspace.0, vaddr.0)), Some((f, _, _)) if *f == frame) {
            s.frames.remove(&(vspace.0, vaddr.0));
        }
    }

    fn map_page_table(&mut self, vspace: PhysAddr, vaddr: VirtAddr, table: PhysAddr) {
        self.0
            .lock()
            .page_tables
            .insert((vspace.0, vaddr.0 >> LARGE_BITS), table);
    }

    fn unmap_page_table(&mut self, vspace: PhysAddr, vaddr: VirtAddr, table: PhysAddr) {
        let mut s = self.0.lock();
        let key = (vspace.0, vaddr.0 >> LARGE_BITS);
        if s.page_tables.get(&key) == Some(&table) {
            s.page_tables.remove(&key);
        }
    }

    fn set_vspace_root(&mut self, root: Option<PhysAddr>) {
        self.0.lock().vspace_root = root;
    }
}

/// A booted kernel whose current thread is the root thread.
pub struct TestKernel {
    pub kernel: KernelState,
    pub machine: MockMachine,
    pub root_tcb: ObjectRef,
    pub root_cnode: ObjectRef,
    pub summary: BootSummary,
    /// Next root CNode slot handed out by the creation helpers.
    next_slot: u32,
}

impl TestKernel {
    pub const VSPACE_ROOT: u64 = 0x1000;
    pub const IPC_BUFFER: u64 = 0x2000;
    pub const IPC_BUFFER_VADDR: u64 = 0x40_0000;
    pub const ENTRY: u64 = 0x1_0000;
    pub const FREE_BASE: u64 = 0x100_0000;
    pub const FREE_SIZE: u64 = 0x100_0000;
    /// First slot the creation helpers use.
    pub const FIRST_FREE_SLOT: u32 = 0x100;

    pub fn boot() -> Self {
        Self::boot_with(KernelConfig::default())
    }

    pub fn boot_with(config: KernelConfig) -> Self {
        let machine = MockMachine::new();
        let info = BootInfo {
            free: vec![Region::with_size(PhysAddr(Self::FREE_BASE), Self::FREE_SIZE)],
            device: vec![Region::with_size(PhysAddr(0x9000_0000), 0x1_0000)],
            vspace_root: PhysAddr(Self::VSPACE_ROOT),
            ipc_buffer: PhysAddr(Self::IPC_BUFFER),
            ipc_buffer_vaddr: VirtAddr(Self::IPC_BUFFER_VADDR),
            entry: VirtAddr(Self::ENTRY),
        };
        let (kernel, summary) =
            boot_kernel(config, Box::new(machine.clone()), &info).expect("boot");
        Self {
            kernel,
            machine,
            root_tcb: summary.root_tcb,
            root_cnode: summary.root_cnode,
            summary,
            next_slot: Self::FIRST_FREE_SLOT,
        }
    }

    pub fn machine(&self) -> spin::MutexGuard<'_, MockState> {
        self.machine.state()
    }

    pub fn root_slot(&self, index: u32) -> SlotRef {
        SlotRef::new(self.root_cnode, index)
    }

    pub fn cap_at(&self, index: u32) -> Cap {
        self.kernel.objects().cte(self.root_slot(index)).cap
    }

    /// Slot of the largest RAM untyped.
    pub fn largest_untyped(&self) -> u32 {
        self.summary
            .untypeds
            .iter()
            .filter(|u| !u.is_device)
            .max_by_key(|u| u.size_bits)
            .expect("RAM untyped")
            .slot
    }

    /// Hand out `count` consecutive free root slots.
    pub fn alloc_slots(&mut self, count: u32) -> u32 {
        let first = self.next_slot;
        self.next_slot += count;
        first
    }

    /// Physical address of a thread's IPC buffer.
    pub fn buffer_of(&self, thread: ObjectRef) -> PhysAddr {
        self.kernel
            .lookup_ipc_buffer(false, thread)
            .expect("thread has an IPC buffer")
    }

    /// Load message registers the way user space would.
    pub fn set_mrs(&mut self, thread: ObjectRef, values: &[u64]) {
        let buffer = self.kernel.lookup_ipc_buffer(false, thread);
        for (i, value) in values.iter().enumerate() {
            if i < N_MSG_REGISTERS {
                self.kernel.tcb_mut(thread).context.set(MSG_REGISTERS[i], *value);
            } else {
                let buffer = buffer.expect("long message needs an IPC buffer");
                self.write_word(buffer.offset(((MSG_OFFSET + i) * 8) as u64), *value);
            }
        }
    }

    pub fn write_word(&self, addr: PhysAddr, value: u64) {
        self.machine().memory.insert(addr.0, value);
    }

    /// Message register `i` of `thread`.
    pub fn mr(&self, thread: ObjectRef, i: usize) -> u64 {
        self.kernel
            .get_mr(thread, self.kernel.lookup_ipc_buffer(true, thread), i)
    }

    /// Issue `syscall` from the current thread with the given registers.
    pub fn syscall(&mut self, syscall: Syscall, cptr: u64, info: MessageInfo) {
        let cur = self.kernel.cur_thread();
        let ctx = &mut self.kernel.tcb_mut(cur).context;
        ctx.set(CAP_REG, cptr);
        ctx.set(MSG_INFO_REG, info.to_word());
        self.kernel.handle_syscall(syscall as u64);
    }

    /// Issue `syscall` from the current thread carrying a plain message.
    pub fn ipc(&mut self, syscall: Syscall, cptr: u64, label: u64, args: &[u64]) {
        let cur = self.kernel.cur_thread();
        self.set_mrs(cur, args);
        self.syscall(syscall, cptr, MessageInfo::new(label, 0, 0, args.len() as u64));
    }

    /// Invoke `cptr` with Call from the current thread and return the reply
    /// tag it sees.
    pub fn call(
        &mut self,
        cptr: u64,
        label: InvocationLabel,
        args: &[u64],
        extra_cptrs: &[u64],
    ) -> MessageInfo {
        let cur = self.kernel.cur_thread();
        self.set_mrs(cur, args);
        if !extra_cptrs.is_empty() {
            let buffer = self.buffer_of(cur);
            for (i, cptr) in extra_cptrs.iter().enumerate() {
                self.write_word(buffer.offset(((CAPS_OFFSET + i) * 8) as u64), *cptr);
            }
        }
        let info = MessageInfo::new(
            label.as_u64(),
            0,
            extra_cptrs.len() as u64,
            args.len() as u64,
        );
        self.syscall(Syscall::Call, cptr, info);
        MessageInfo::from_word(self.kernel.tcb(cur).context.get(MSG_INFO_REG))
    }

    /// Retype the largest untyped into `count` objects starting at root
    /// slot `dest`; returns the reply label.
    pub fn retype(&mut self, ty: ObjectType, user_size: u64, dest: u32, count: u64) -> u64 {
        let untyped = self.largest_untyped();
        self.retype_from(untyped, ty, user_size, dest, count)
    }

    pub fn retype_from(
        &mut self,
        untyped: u32,
        ty: ObjectType,
        user_size: u64,
        dest: u32,
        count: u64,
    ) -> u64 {
        let root = u64::from(Slot::InitThreadCNode.index());
        self.call(
            u64::from(untyped),
            InvocationLabel::UntypedRetype,
            &[ty as u64, user_size, 0, 0, u64::from(dest), count],
            &[root],
        )
        .label
    }

    /// Create an object of `ty` in a fresh root slot.
    pub fn create(&mut self, ty: ObjectType, user_size: u64) -> (u32, Cap) {
        let slot = self.alloc_slots(1);
        assert_eq!(self.retype(ty, user_size, slot, 1), 0, "retype {ty}");
        (slot, self.cap_at(slot))
    }

    pub fn create_endpoint(&mut self) -> (u32, ObjectRef) {
        let (slot, cap) = self.create(ObjectType::Endpoint, 0);
        (slot, cap.object().expect("endpoint object"))
    }

    pub fn create_notification(&mut self) -> ObjectRef {
        let (_, cap) = self.create(ObjectType::Notification, 0);
        cap.object().expect("notification object")
    }

    /// Create a runnable thread sharing the root CSpace and VSpace, with its
    /// own IPC buffer frame.
    pub fn create_thread(&mut self, priority: u8) -> (u32, ObjectRef) {
        let (slot, cap) = self.create(ObjectType::Tcb, 0);
        let Cap::Thread { tcb } = cap else {
            panic!("retype made {cap}");
        };
        let (frame_slot, frame) = self.create(ObjectType::Frame, 0);

        let cnode = self.root_slot(Slot::InitThreadCNode.index());
        let vspace = self.root_slot(Slot::InitThreadVSpace.index());
        let frame_slot = self.root_slot(frame_slot);
        let objects = &mut self.kernel.objects;
        let (cnode_cap, vspace_cap) = (objects.cte(cnode).cap, objects.cte(vspace).cap);
        objects.cte_insert(cnode_cap, cnode, tcb_slot(tcb, TcbSlot::CTable));
        objects.cte_insert(vspace_cap, vspace, tcb_slot(tcb, TcbSlot::VTable));
        objects.cte_insert(frame, frame_slot, tcb_slot(tcb, TcbSlot::IpcBuffer));

        let t = self.kernel.tcb_mut(tcb);
        t.priority = priority;
        t.mcp = priority;
        t.ipc_buffer = VirtAddr(0x50_0000);
        self.kernel.restart(tcb);
        self.kernel.kernel_exit();
        (slot, tcb)
    }

    /// Make `thread` the current thread, as if the scheduler picked it.
    pub fn run_as(&mut self, thread: ObjectRef) {
        let cur = self.kernel.cur_thread();
        if cur == thread {
            return;
        }
        if cur != self.kernel.idle_thread() && self.kernel.tcb(cur).state.is_runnable() {
            self.kernel.tcb_sched_enqueue(cur);
        }
        self.kernel.switch_to_thread(thread);
        self.kernel.activate_thread();
    }

    pub fn state_of(&self, thread: ObjectRef) -> ThreadState {
        self.kernel.tcb(thread).state
    }
}
