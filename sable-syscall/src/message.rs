//! Message-info word
//!
//! Every IPC carries one tag word describing the message:
//!
//! ```text
//! 63                    12 11      9 8   7 6      0
//! +-----------------------+---------+-----+--------+
//! |         label         | unwrapd | xcap| length |
//! +-----------------------+---------+-----+--------+
//! ```
//!
//! `length` counts message registers, `extra_caps` the capabilities sent
//! alongside, and `caps_unwrapped` is a receiver-side bitmask of extra
//! caps that were delivered as badges rather than as capabilities.

use core::fmt;

/// Largest message, in words.
pub const MSG_MAX_LENGTH: u64 = 120;

/// Largest number of extra capabilities per message.
pub const MAX_EXTRA_CAPS: u64 = 3;

const LENGTH_BITS: u32 = 7;
const EXTRA_CAPS_BITS: u32 = 2;
const UNWRAPPED_BITS: u32 = 3;
const EXTRA_CAPS_SHIFT: u32 = LENGTH_BITS;
const UNWRAPPED_SHIFT: u32 = EXTRA_CAPS_SHIFT + EXTRA_CAPS_BITS;
const LABEL_SHIFT: u32 = UNWRAPPED_SHIFT + UNWRAPPED_BITS;

/// Decoded message-info word.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageInfo {
    /// User- or kernel-defined label (52 bits).
    pub label: u64,
    /// Bitmask of extra caps delivered unwrapped.
    pub caps_unwrapped: u64,
    /// Number of extra caps.
    pub extra_caps: u64,
    /// Number of message registers.
    pub length: u64,
}

impl MessageInfo {
    /// Build a message-info value.
    #[inline]
    #[must_use]
    pub const fn new(label: u64, caps_unwrapped: u64, extra_caps: u64, length: u64) -> Self {
        Self {
            label,
            caps_unwrapped,
            extra_caps,
            length,
        }
    }

    /// Decode a word exactly as written.
    #[must_use]
    pub const fn from_raw(word: u64) -> Self {
        Self {
            label: word >> LABEL_SHIFT,
            caps_unwrapped: (word >> UNWRAPPED_SHIFT) & ((1 << UNWRAPPED_BITS) - 1),
            extra_caps: (word >> EXTRA_CAPS_SHIFT) & ((1 << EXTRA_CAPS_BITS) - 1),
            length: word & ((1 << LENGTH_BITS) - 1),
        }
    }

    /// Decode a word from user space, clamping the length to
    /// [`MSG_MAX_LENGTH`].
    #[must_use]
    pub const fn from_word(word: u64) -> Self {
        let mut info = Self::from_raw(word);
        if info.length > MSG_MAX_LENGTH {
            info.length = MSG_MAX_LENGTH;
        }
        info
    }

    /// Encode to a word.
    #[must_use]
    pub const fn to_word(self) -> u64 {
        (self.label << LABEL_SHIFT)
            | ((self.caps_unwrapped & ((1 << UNWRAPPED_BITS) - 1)) << UNWRAPPED_SHIFT)
            | ((self.extra_caps & ((1 << EXTRA_CAPS_BITS) - 1)) << EXTRA_CAPS_SHIFT)
            | (self.length & ((1 << LENGTH_BITS) - 1))
    }
}

impl fmt::Debug for MessageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MessageInfo(label={:#x}, unwrapped={:#b}, extra_caps={}, len={})",
            self.label, self.caps_unwrapped, self.extra_caps, self.length
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_field_positions() {
        let info = MessageInfo::new(0x1, 0b101, 2, 9);
        assert_eq!(info.to_word(), (1 << 12) | (0b101 << 9) | (2 << 7) | 9);
    }

    #[test]
    fn test_length_clamped() {
        let info = MessageInfo::from_word(127);
        assert_eq!(info.length, MSG_MAX_LENGTH);
        assert_eq!(MessageInfo::from_raw(127).length, 127);
    }

    proptest! {
        #[test]
        fn word_decodes_to_itself(word in any::<u64>()) {
            prop_assert_eq!(MessageInfo::from_raw(word).to_word(), word);
        }
    }
}
