//! Sable Syscall ABI
//!
//! Shared definitions for kernel-userspace communication.
//! This crate is `no_std`, allowing it to be used in both the kernel and
//! userspace.
//!
//! # Modules
//!
//! - [`numbers`] - Syscall numbers
//! - [`message`] - Message-info word codec
//! - [`ipc_buffer`] - IPC buffer layout
//! - [`invocation`] - Object invocation labels
//! - [`error`] - Syscall error and lookup failure codes
//! - [`fault`] - Fault message labels and layouts

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod fault;
pub mod invocation;
pub mod ipc_buffer;
pub mod message;
pub mod numbers;

// Re-export commonly used items
pub use error::SyscallErrorKind;
pub use fault::FaultLabel;
pub use invocation::InvocationLabel;
pub use ipc_buffer::{
    CapTransfer, IpcBuffer, IPC_BUFFER_SIZE, IPC_BUFFER_SIZE_BITS, IPC_BUFFER_WORDS,
};
pub use message::{MessageInfo, MAX_EXTRA_CAPS, MSG_MAX_LENGTH};
pub use numbers::Syscall;
pub use sable_cap::root_slots;

/// Message registers passed in machine registers.
pub const N_MSG_REGISTERS: usize = 4;
