//! Sable Capability Model
//!
//! This crate provides the capability primitives for the Sable
//! microkernel: the closed set of capability variants, the slots that hold
//! them, and the derivation tree that links every slot to the capability
//! it was derived from.
//!
//! # Overview
//!
//! A **capability** is an unforgeable token that combines:
//! - An object reference (a kernel object, or a range of physical memory)
//! - Access rights and type-specific data (badge, guard, free cursor)
//!
//! Capabilities are values. They are copied into slots ([`Cte`]) and do
//! not own memory; the object behind them lives in memory carved from an
//! untyped region and dies only when that region is reset.
//!
//! # Derivation Tree
//!
//! Every occupied slot sits on one doubly linked list ordered so that a
//! capability's descendants immediately follow it. [`CdtOps`] provides
//! the list surgery (insert, move, swap, unlink) and the authority tests
//! (`same_region_as`, `is_mdb_parent_of`, `is_final_capability`) on top of
//! any storage that can hand out slots by [`SlotRef`].
//!
//! # Addressing
//!
//! [`resolve_address_bits`] walks a CPtr through guarded CNodes, producing
//! either a slot or a [`LookupFault`].
//!
//! # Kernel Integration
//!
//! This crate defines the capability logic; the kernel provides storage by
//! implementing [`SlotStore`] and [`CdtOps`] over its object table.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

mod badge;
mod cap;
pub mod cdt;
pub mod cnode;
mod error;
pub mod objects;
mod rights;
pub mod root_slots;
mod slot;

pub use badge::Badge;
pub use cap::{Cap, CapType, FrameMapping, ZombieKind};
pub use cdt::{CdtOps, MemRegion, SlotStore};
pub use cnode::{resolve_address_bits, CNodeCapData, Resolved, WORD_BITS};
pub use error::{CapError, CapResult, LookupFault};
pub use objects::{
    EndpointObject, EndpointState, IrqNumber, IrqState, NotificationObject, NotificationState,
    ObjectType, TcbQueue, TcbSlot, ThreadState, DEFAULT_PRIORITY,
};
pub use rights::{CapRights, VmRights};
pub use slot::{Cte, MdbNode, ObjectRef, SlotRef};
