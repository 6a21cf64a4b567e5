//! Capability error types
//!
//! [`CapError`] covers failures of slot-level operations on the derivation
//! tree. [`LookupFault`] describes why walking a CPtr through the CSpace
//! failed; it is either reported back as part of a syscall error or
//! delivered to the thread's fault handler.

use core::fmt;

/// Errors from operations on capability slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use = "capability errors must be handled"]
pub enum CapError {
    /// The destination slot is occupied; delete its capability first.
    DeleteFirst,

    /// The slot still has derived children; revoke it first.
    RevokeFirst,

    /// The capability cannot be derived or used this way.
    IllegalOperation,
}

impl CapError {
    /// Short description for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DeleteFirst => "destination slot occupied",
            Self::RevokeFirst => "capability has children",
            Self::IllegalOperation => "illegal operation on capability",
        }
    }
}

impl fmt::Display for CapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for capability slot operations.
pub type CapResult<T> = Result<T, CapError>;

/// Why a CPtr could not be resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LookupFault {
    /// The root capability was not a CNode.
    InvalidRoot,

    /// The slot reached was empty or held the wrong kind of capability.
    MissingCapability {
        /// Bits of the CPtr not yet consumed.
        bits_left: u32,
    },

    /// Resolution needed more bits than were left, or stopped early.
    DepthMismatch {
        /// Bits the next level would have consumed.
        bits_found: u32,
        /// Bits of the CPtr not yet consumed.
        bits_left: u32,
    },

    /// A CNode guard did not match the CPtr.
    GuardMismatch {
        /// Bits of the CPtr not yet consumed.
        bits_left: u32,
        /// The CNode's guard.
        guard_found: u64,
        /// Size of the CNode's guard in bits.
        guard_size: u32,
    },
}

impl LookupFault {
    /// ABI code of the failure kind.
    #[must_use]
    pub const fn code(&self) -> u64 {
        match self {
            Self::InvalidRoot => 0,
            Self::MissingCapability { .. } => 1,
            Self::DepthMismatch { .. } => 2,
            Self::GuardMismatch { .. } => 3,
        }
    }

    /// Name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InvalidRoot => "InvalidRoot",
            Self::MissingCapability { .. } => "MissingCapability",
            Self::DepthMismatch { .. } => "DepthMismatch",
            Self::GuardMismatch { .. } => "GuardMismatch",
        }
    }

    /// Encode into message words: the kind code plus one followed by the
    /// kind's fields. Returns the buffer and the number of words used.
    #[must_use]
    pub const fn to_words(&self) -> ([u64; 4], usize) {
        let kind = self.code() + 1;
        match *self {
            Self::InvalidRoot => ([kind, 0, 0, 0], 1),
            Self::MissingCapability { bits_left } => ([kind, bits_left as u64, 0, 0], 2),
            Self::DepthMismatch {
                bits_found,
                bits_left,
            } => ([kind, bits_left as u64, bits_found as u64, 0], 3),
            Self::GuardMismatch {
                bits_left,
                guard_found,
                guard_size,
            } => ([kind, bits_left as u64, guard_found, guard_size as u64], 4),
        }
    }
}

impl fmt::Display for LookupFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRoot => write!(f, "invalid root"),
            Self::MissingCapability { bits_left } => {
                write!(f, "missing capability ({bits_left} bits left)")
            }
            Self::DepthMismatch {
                bits_found,
                bits_left,
            } => write!(f, "depth mismatch (found {bits_found}, {bits_left} left)"),
            Self::GuardMismatch {
                bits_left,
                guard_found,
                guard_size,
            } => write!(
                f,
                "guard mismatch (guard {guard_found:#x}/{guard_size}, {bits_left} bits left)"
            ),
        }
    }
}
