//! # sable-common
//!
//! Shared types for the Sable kernel and its boot collaborators.
//!
//! - [`PhysAddr`] / [`VirtAddr`]: address newtypes used across crate boundaries
//! - [`RegionList`](memory::RegionList): the sorted free-memory list handed to
//!   the kernel at boot, and the splitting rules that turn it into untyped
//!   blocks
//!
//! # no_std
//!
//! This crate is `#![no_std]` and has no dependencies, making it suitable
//! as a foundation crate that all other Sable crates can depend on.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod addr;
pub mod memory;

pub use addr::{PhysAddr, VirtAddr};
pub use memory::{AlignedBlocks, Region, RegionList, RegionListFull, MAX_FREE_REGIONS};
