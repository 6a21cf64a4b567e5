//! Badge values for sender identification
//!
//! A badge is attached to an endpoint or notification capability when it
//! is minted. Receivers see the sender's badge on every message; a
//! notification ORs the badges of all signals it accumulates into a single
//! word.
//!
//! Badge zero means "unbadged". Only unbadged capabilities can be given a
//! badge, so a badge once set can never be changed by deriving further
//! copies.

use core::fmt;

/// A badge value for capability identification.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Badge(u64);

impl Badge {
    /// No badge (unbadged capability).
    pub const NONE: Self = Self(0);

    /// Create a new badge with the given value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw badge value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Check if this is an unbadged capability (badge is zero).
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Check if this capability carries a badge.
    #[inline]
    #[must_use]
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }

    /// Accumulate another badge into this one (notification signal word).
    #[inline]
    #[must_use]
    pub const fn combine(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl fmt::Debug for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "Badge::NONE")
        } else {
            write!(f, "Badge({:#x})", self.0)
        }
    }
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

impl From<u64> for Badge {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Badge> for u64 {
    #[inline]
    fn from(badge: Badge) -> Self {
        badge.0
    }
}

impl core::ops::BitOr for Badge {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self::Output {
        self.combine(rhs)
    }
}

impl core::ops::BitOrAssign for Badge {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
