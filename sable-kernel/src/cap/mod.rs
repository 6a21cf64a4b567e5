//! Capability system kernel integration
//!
//! The derivation-tree algebra lives in `sable-cap`; this module drives it
//! against the kernel's object table.
//!
//! # Components
//!
//! - [`cspace`]: CPtr lookups in a thread's CSpace and IPC buffer lookup
//! - [`derive`]: rules for copying a capability into a new slot
//! - [`delete`]: deletion, finalisation, Zombie reduction and revocation,
//!   all preemptible

pub mod cspace;
pub mod delete;
pub mod derive;

pub use delete::Finalised;
