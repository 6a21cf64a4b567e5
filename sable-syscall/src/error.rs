//! Syscall error codes
//!
//! A failed invocation replies to the caller with the error code as the
//! message label and the error's auxiliary words in the message registers.
//! Failed lookups additionally encode the lookup failure, starting with
//! one of the [`lookup_failure`] codes.

/// Syscall error codes, carried as the reply label.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallErrorKind {
    /// Success.
    NoError = 0,
    /// An argument was invalid; aux word: argument number.
    InvalidArgument = 1,
    /// A capability argument was of the wrong kind; aux: argument number.
    InvalidCapability = 2,
    /// The operation is not permitted on this object.
    IllegalOperation = 3,
    /// An argument was out of range; aux: minimum, maximum.
    RangeError = 4,
    /// An argument was misaligned.
    AlignmentError = 5,
    /// A capability lookup failed; aux: source flag, lookup failure.
    FailedLookup = 6,
    /// The message was too short for the invocation.
    TruncatedMessage = 7,
    /// The destination slot is occupied.
    DeleteFirst = 8,
    /// The capability still has children.
    RevokeFirst = 9,
    /// The untyped region is too full; aux: bytes remaining.
    NotEnoughMemory = 10,
}

impl SyscallErrorKind {
    /// Convert to the raw label value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self as u64
    }

    /// Try to convert from a raw label.
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::NoError),
            1 => Some(Self::InvalidArgument),
            2 => Some(Self::InvalidCapability),
            3 => Some(Self::IllegalOperation),
            4 => Some(Self::RangeError),
            5 => Some(Self::AlignmentError),
            6 => Some(Self::FailedLookup),
            7 => Some(Self::TruncatedMessage),
            8 => Some(Self::DeleteFirst),
            9 => Some(Self::RevokeFirst),
            10 => Some(Self::NotEnoughMemory),
            _ => None,
        }
    }

    /// Get the error name for logging.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NoError => "NoError",
            Self::InvalidArgument => "InvalidArgument",
            Self::InvalidCapability => "InvalidCapability",
            Self::IllegalOperation => "IllegalOperation",
            Self::RangeError => "RangeError",
            Self::AlignmentError => "AlignmentError",
            Self::FailedLookup => "FailedLookup",
            Self::TruncatedMessage => "TruncatedMessage",
            Self::DeleteFirst => "DeleteFirst",
            Self::RevokeFirst => "RevokeFirst",
            Self::NotEnoughMemory => "NotEnoughMemory",
        }
    }
}

/// Lookup failure codes, written as the first word of an encoded failure.
pub mod lookup_failure {
    /// No failure.
    pub const NO_FAILURE: u64 = 0;
    /// The root capability was not a CNode.
    pub const INVALID_ROOT: u64 = 1;
    /// The slot was empty or of the wrong kind.
    pub const MISSING_CAPABILITY: u64 = 2;
    /// Resolution ran out of, or had leftover, bits.
    pub const DEPTH_MISMATCH: u64 = 3;
    /// A guard did not match.
    pub const GUARD_MISMATCH: u64 = 4;
}
