//! Preemption points
//!
//! Long-running operations count work units and, once the configured
//! budget is spent, poll the interrupt controller. A pending interrupt
//! unwinds the operation with [`Preempted`].

use crate::{KernelState, Preempted};

impl KernelState {
    /// Count one unit of work and check for pending interrupts.
    pub fn preemption_point(&mut self) -> Result<(), Preempted> {
        self.work_units += 1;
        if self.work_units >= self.config.max_work_units_per_preemption {
            self.work_units = 0;
            if self.machine.is_irq_pending() {
                log::trace!("preempted after work budget");
                return Err(Preempted);
            }
        }
        Ok(())
    }
}
