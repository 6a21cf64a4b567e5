//! Kernel objects
//!
//! Objects carved from untyped memory are recorded in the [`ObjectTable`],
//! an arena addressed by [`ObjectRef`](sable_cap::ObjectRef). Capabilities
//! name objects by table index; the table entry remembers the physical
//! range the object occupies so a reset of the backing untyped region can
//! release it.

pub mod context;
pub mod table;
pub mod tcb;

pub use context::UserContext;
pub use table::{KernelObject, ObjectEntry, ObjectTable};
pub use tcb::Tcb;
