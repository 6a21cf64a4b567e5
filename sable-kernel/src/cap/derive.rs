//! Capability derivation
//!
//! Copy, Mint and capability transfer never store a capability verbatim:
//! they store what [`KernelState::derive_cap`] makes of it. Capabilities
//! that must stay unique derive to Null, and a copied frame does not carry
//! its mapping.

use sable_cap::{Cap, CdtOps, SlotRef};

use crate::syscall::SyscallError;
use crate::KernelState;

impl KernelState {
    /// The capability a copy of `cap` (held in `slot`) receives.
    pub fn derive_cap(&self, slot: SlotRef, cap: Cap) -> Result<Cap, SyscallError> {
        match cap {
            Cap::Zombie { .. } | Cap::IrqControl | Cap::Reply { .. } => Ok(Cap::Null),
            Cap::Untyped { .. } => {
                self.objects.ensure_no_children(slot)?;
                Ok(cap)
            }
            Cap::Frame {
                base,
                size_bits,
                rights,
                is_device,
                ..
            } => Ok(Cap::Frame {
                base,
                size_bits,
                rights,
                is_device,
                mapping: None,
            }),
            // An unmapped copy could be installed a second time.
            Cap::PageTable {
                is_root: false,
                mapping: None,
                ..
            } => Err(SyscallError::IllegalOperation),
            other => Ok(other),
        }
    }
}
