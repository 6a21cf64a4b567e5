//! Interrupt lines
//!
//! An IRQ handler capability names one interrupt line. The line's state
//! decides what the kernel does when it fires: signal a notification,
//! tick the scheduler, or mask it as spurious.

use core::fmt;

/// Hardware interrupt number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct IrqNumber(pub u16);

impl IrqNumber {
    /// Raw line number.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for IrqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "irq{}", self.0)
    }
}

/// What an interrupt line is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IrqState {
    /// No handler issued; the line is masked when it fires.
    #[default]
    Inactive = 0,
    /// A handler capability exists; firing signals its notification.
    Signal = 1,
    /// The kernel's preemption timer.
    Timer = 2,
    /// Reserved by the platform.
    Reserved = 3,
}
