//! Big kernel lock
//!
//! All kernel entries on all cores are serialized by one FIFO ticket lock
//! around the [`KernelState`]. Each entry records the core it runs on
//! before touching per-core scheduler state.
//!
//! A platform typically keeps the kernel in a `spin::Once` static:
//!
//! ```ignore
//! static KERNEL: spin::Once<Kernel> = spin::Once::new();
//! ```

use spin::mutex::{TicketMutex, TicketMutexGuard};

use crate::KernelState;

/// The kernel state behind the big kernel lock.
pub struct Kernel {
    state: TicketMutex<KernelState>,
}

impl Kernel {
    #[must_use]
    pub const fn new(state: KernelState) -> Self {
        Self {
            state: TicketMutex::new(state),
        }
    }

    /// Take the lock without entering the kernel on a particular core.
    pub fn lock(&self) -> TicketMutexGuard<'_, KernelState> {
        self.state.lock()
    }

    fn enter(&self, core: usize) -> TicketMutexGuard<'_, KernelState> {
        let mut state = self.state.lock();
        state.set_current_node(core);
        state
    }

    /// Syscall trap on `core`.
    pub fn handle_syscall(&self, core: usize, number: u64) {
        self.enter(core).handle_syscall(number);
    }

    /// Interrupt on `core`.
    pub fn handle_interrupt(&self, core: usize) {
        self.enter(core).handle_interrupt_entry();
    }

    /// Architecture-defined user exception on `core`.
    pub fn handle_user_fault(&self, core: usize, number: u64, code: u64) {
        self.enter(core).handle_user_level_fault(number, code);
    }

    /// Page fault on `core`.
    pub fn handle_vm_fault(&self, core: usize, address: u64, fsr: u64, instruction: bool) {
        self.enter(core).handle_vm_fault_entry(address, fsr, instruction);
    }

    /// Undefined syscall number on `core`.
    pub fn handle_unknown_syscall(&self, core: usize, number: u64) {
        self.enter(core).handle_unknown_syscall(number);
    }
}

#[cfg(test)]
mod tests {
    use sable_cap::ThreadState;
    use sable_syscall::Syscall;

    use super::Kernel;
    use crate::testing::TestKernel;

    #[test]
    fn test_entries_run_under_the_lock() {
        let t = TestKernel::boot();
        let root = t.root_tcb;
        let kernel = Kernel::new(t.kernel);

        kernel.handle_syscall(0, Syscall::Yield as u64);
        assert_eq!(kernel.lock().cur_thread(), root);

        // No fault handler: the thread is left inactive.
        kernel.handle_vm_fault(0, 0x1000, 0, false);
        let state = kernel.lock();
        assert_eq!(state.tcb(root).state, ThreadState::Inactive);
        assert_ne!(state.cur_thread(), root);
    }
}
