//! Capability access rights
//!
//! Rights are orthogonal and can be independently attenuated, never
//! escalated. Interpretation is object-type specific:
//!
//! - **Read**: receive on an endpoint or notification, read a frame
//! - **Write**: send on an endpoint, signal a notification, write a frame
//! - **Grant**: transfer capabilities through an endpoint
//! - **GrantReply**: let a Call through an endpoint create a reply capability

use core::fmt;

/// Access rights for capabilities.
///
/// # Layout
///
/// Rights are packed into a single byte, and user space passes them in the
/// low bits of a message word:
/// - Bit 0: Read
/// - Bit 1: Write
/// - Bit 2: Grant
/// - Bit 3: GrantReply
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct CapRights(u8);

impl CapRights {
    /// No rights.
    pub const NONE: Self = Self(0);

    /// Read permission.
    pub const READ: Self = Self(1 << 0);

    /// Write permission.
    pub const WRITE: Self = Self(1 << 1);

    /// Grant permission.
    pub const GRANT: Self = Self(1 << 2);

    /// Grant-Reply permission.
    pub const GRANT_REPLY: Self = Self(1 << 3);

    /// Read and Write rights.
    pub const RW: Self = Self(Self::READ.0 | Self::WRITE.0);

    /// All rights.
    pub const ALL: Self = Self(0x0F);

    /// Create rights from individual flags.
    #[inline]
    #[must_use]
    pub const fn new(read: bool, write: bool, grant: bool, grant_reply: bool) -> Self {
        let mut bits = 0u8;
        if read {
            bits |= Self::READ.0;
        }
        if write {
            bits |= Self::WRITE.0;
        }
        if grant {
            bits |= Self::GRANT.0;
        }
        if grant_reply {
            bits |= Self::GRANT_REPLY.0;
        }
        Self(bits)
    }

    /// Decode rights from a user-supplied message word.
    ///
    /// Only the lower 4 bits are used; upper bits are ignored.
    #[inline]
    #[must_use]
    pub const fn from_word(word: u64) -> Self {
        Self((word & 0x0F) as u8)
    }

    /// Get the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Read right present.
    #[inline]
    #[must_use]
    pub const fn has_read(self) -> bool {
        (self.0 & Self::READ.0) != 0
    }

    /// Write right present.
    #[inline]
    #[must_use]
    pub const fn has_write(self) -> bool {
        (self.0 & Self::WRITE.0) != 0
    }

    /// Grant right present.
    #[inline]
    #[must_use]
    pub const fn has_grant(self) -> bool {
        (self.0 & Self::GRANT.0) != 0
    }

    /// GrantReply right present.
    #[inline]
    #[must_use]
    pub const fn has_grant_reply(self) -> bool {
        (self.0 & Self::GRANT_REPLY.0) != 0
    }

    /// Check if these rights contain all the specified rights.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Intersect rights (logical AND).
    #[inline]
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

impl fmt::Debug for CapRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapRights({self})")
    }
}

impl fmt::Display for CapRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.has_read() { "R" } else { "-" },
            if self.has_write() { "W" } else { "-" },
            if self.has_grant() { "G" } else { "-" },
            if self.has_grant_reply() { "g" } else { "-" },
        )
    }
}

impl core::ops::BitAnd for CapRights {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self::Output {
        self.intersect(rhs)
    }
}

/// Access rights of a frame mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VmRights {
    /// Mapped for kernel use only; user access faults.
    KernelOnly = 0,
    /// User read-only.
    ReadOnly = 1,
    /// User read-write.
    ReadWrite = 2,
}

impl VmRights {
    /// Attenuate these VM rights by a capability rights mask.
    #[must_use]
    pub const fn mask(self, rights: CapRights) -> Self {
        match self {
            Self::ReadOnly if rights.has_read() => Self::ReadOnly,
            Self::ReadWrite if rights.has_read() => {
                if rights.has_write() {
                    Self::ReadWrite
                } else {
                    Self::ReadOnly
                }
            }
            _ => Self::KernelOnly,
        }
    }

    /// VM rights implied by a capability rights word.
    #[must_use]
    pub const fn from_cap_rights(rights: CapRights) -> Self {
        Self::ReadWrite.mask(rights)
    }

    /// Whether user space may write through this mapping.
    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rights_construction() {
        assert_eq!(CapRights::NONE.bits(), 0);
        assert_eq!(CapRights::ALL.bits(), 0x0F);
        assert_eq!(CapRights::new(true, true, false, false), CapRights::RW);
    }

    #[test]
    fn test_rights_from_word_ignores_high_bits() {
        assert_eq!(CapRights::from_word(0xF0 | 0x3), CapRights::RW);
    }

    #[test]
    fn test_rights_intersect() {
        assert_eq!(CapRights::ALL & CapRights::RW, CapRights::RW);
        assert_eq!(CapRights::READ & CapRights::WRITE, CapRights::NONE);
        assert!(CapRights::ALL.contains(CapRights::GRANT_REPLY));
    }

    #[test]
    fn test_vm_rights_mask() {
        assert_eq!(VmRights::ReadWrite.mask(CapRights::ALL), VmRights::ReadWrite);
        assert_eq!(VmRights::ReadWrite.mask(CapRights::READ), VmRights::ReadOnly);
        assert_eq!(VmRights::ReadWrite.mask(CapRights::WRITE), VmRights::KernelOnly);
        assert_eq!(VmRights::ReadOnly.mask(CapRights::RW), VmRights::ReadOnly);
        assert_eq!(VmRights::KernelOnly.mask(CapRights::ALL), VmRights::KernelOnly);
    }
}
