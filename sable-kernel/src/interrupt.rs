//! Interrupt delivery
//!
//! Each interrupt line has an [`IrqState`]. A line in the `Signal` state
//! delivers to the notification capability stored in its slot of the IRQ
//! node, a kernel-owned CNode with one slot per line. The line stays
//! masked after delivery until the driver acknowledges it with AckIRQ.
//!
//! # Interrupt Flow
//!
//! 1. The trap layer enters [`KernelState::handle_interrupt_entry`]
//! 2. The controller is asked for the active line
//! 3. `Signal`: the bound notification is signalled and the line masked
//! 4. `Timer`: the current thread's time slice is charged
//! 5. `Inactive` or out of range: the line is masked
//! 6. The line is acknowledged and the scheduler runs

use sable_cap::{IrqNumber, IrqState, SlotRef, SlotStore};

use crate::KernelState;

impl KernelState {
    /// Slot of the IRQ node holding the notification for `irq`.
    #[inline]
    pub(crate) fn irq_slot(&self, irq: IrqNumber) -> SlotRef {
        SlotRef::new(self.irq_node, u32::from(irq.0))
    }

    /// Whether `irq` is a line this kernel manages.
    #[inline]
    pub(crate) fn irq_in_range(&self, irq: IrqNumber) -> bool {
        irq.0 <= self.config.max_irq
    }

    /// Whether a handler has been issued for `irq`.
    pub(crate) fn is_irq_active(&self, irq: IrqNumber) -> bool {
        self.irq_states[irq.as_usize()] != IrqState::Inactive
    }

    /// Set the state of `irq`; an inactive line is masked.
    pub fn set_irq_state(&mut self, irq: IrqNumber, state: IrqState) {
        self.irq_states[irq.as_usize()] = state;
        self.machine.mask_irq(irq, state == IrqState::Inactive);
        log::debug!("irq: {} -> {:?}", irq, state);
    }

    /// Drop the notification delivered to by `irq`.
    pub fn deleting_irq_handler(&mut self, irq: IrqNumber) {
        let slot = self.irq_slot(irq);
        self.cte_delete_one(slot);
    }

    /// Handle one interrupt the controller reported.
    pub fn handle_interrupt(&mut self, irq: IrqNumber) {
        if !self.irq_in_range(irq) {
            log::warn!("irq: {} above max_irq {}", irq, self.config.max_irq);
            self.machine.mask_irq(irq, true);
            self.machine.ack_irq(irq);
            return;
        }

        match self.irq_states[irq.as_usize()] {
            IrqState::Signal => {
                let cap = self.objects.cte(self.irq_slot(irq)).cap;
                match cap {
                    sable_cap::Cap::Notification { object, badge, .. } if cap.can_send() => {
                        log::trace!("irq: {} signals {}", irq, object);
                        self.send_signal(object, badge.value());
                    }
                    _ => log::trace!("irq: {} undelivered", irq),
                }
                self.machine.mask_irq(irq, true);
            }
            IrqState::Timer => {
                self.timer_tick();
                self.machine.reset_timer();
            }
            IrqState::Reserved => {
                log::trace!("irq: reserved {}", irq);
            }
            IrqState::Inactive => {
                log::warn!("irq: {} fired while inactive", irq);
                self.machine.mask_irq(irq, true);
            }
        }
        self.machine.ack_irq(irq);
    }

    /// Kernel entry for a hardware interrupt.
    pub fn handle_interrupt_entry(&mut self) {
        match self.machine.active_irq() {
            Some(irq) => self.handle_interrupt(irq),
            None => log::trace!("irq: spurious"),
        }
        self.kernel_exit();
    }
}

#[cfg(test)]
mod tests {
    use sable_cap::{Badge, Cap, CapRights, IrqNumber, IrqState, NotificationState, SlotStore};

    use crate::testing::TestKernel;

    #[test]
    fn test_signal_irq_masks_until_ack() {
        let mut t = TestKernel::boot();
        let ntfn = t.create_notification();
        let irq = IrqNumber(9);
        let slot = t.kernel.irq_slot(irq);
        t.kernel.objects.cte_mut(slot).cap = Cap::Notification {
            object: ntfn,
            badge: Badge::new(0b100),
            rights: CapRights::RW,
        };
        t.kernel.set_irq_state(irq, IrqState::Signal);
        assert!(!t.machine().is_masked(irq));

        t.machine().raise_irq(irq);
        t.kernel.handle_interrupt_entry();

        let notification = t.kernel.objects.notification(ntfn);
        assert_eq!(notification.state, NotificationState::Active);
        assert_eq!(notification.msg_identifier, 0b100);
        assert!(t.machine().is_masked(irq));
        assert_eq!(t.machine().acked(), &[irq]);
    }

    #[test]
    fn test_inactive_and_out_of_range_irqs_are_masked() {
        let mut t = TestKernel::boot();
        let max = t.kernel.config.max_irq;
        t.kernel.handle_interrupt(IrqNumber(3));
        t.kernel.handle_interrupt(IrqNumber(max + 1));
        assert!(t.machine().is_masked(IrqNumber(3)));
        assert!(t.machine().is_masked(IrqNumber(max + 1)));
        assert_eq!(t.machine().acked().len(), 2);
    }

    #[test]
    fn test_timer_irq_charges_time_slice() {
        let mut t = TestKernel::boot();
        let timer = IrqNumber(1);
        t.kernel.set_irq_state(timer, IrqState::Timer);
        let before = t.kernel.tcb(t.root_tcb).time_slice;
        t.kernel.handle_interrupt(timer);
        assert_eq!(t.kernel.tcb(t.root_tcb).time_slice, before - 1);
        assert_eq!(t.machine().timer_resets(), 1);
    }
}
