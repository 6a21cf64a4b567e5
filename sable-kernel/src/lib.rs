//! # sable-kernel
//!
//! The execution core of the Sable capability microkernel.
//!
//! Everything the kernel knows lives in one [`KernelState`], mutated only
//! under the big kernel lock ([`lock::Kernel`]). The trap layer, page-table
//! walker and interrupt controller are external collaborators reached
//! through the [`machine::Machine`] trait.
//!
//! # Entry Points
//!
//! - [`KernelState::handle_syscall`]: the seven IPC syscalls plus Yield
//! - [`KernelState::handle_interrupt_entry`]: a hardware interrupt
//! - [`KernelState::handle_unknown_syscall`],
//!   [`KernelState::handle_user_level_fault`],
//!   [`KernelState::handle_vm_fault_entry`]: faults raised by the trap layer
//!
//! Each entry ends by resolving the deferred scheduler decision exactly
//! once and activating the chosen thread.
//!
//! # Preemption
//!
//! Long-running operations (revoke, delete, untyped reset) poll for
//! pending interrupts through [`KernelState::preemption_point`] and unwind
//! with [`Preempted`]. The invoking thread is left in `Restart`, so the
//! syscall is simply issued again when it next runs.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod boot;
pub mod cap;
pub mod config;
mod error;
pub mod fault;
pub mod interrupt;
pub mod ipc;
pub mod lock;
pub mod logging;
pub mod machine;
pub mod object;
mod preempt;
pub mod sched;
mod state;
pub mod syscall;
pub mod untyped;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;

pub use error::{KernelError, KernelResult, Preempted};
pub use state::{KernelState, NodeState, SchedulerAction};
