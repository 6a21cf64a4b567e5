//! Syscall error records
//!
//! A failed invocation replies with the error's ABI code as the message
//! label. The auxiliary fields follow in the message registers:
//!
//! | Error | MR0 | MR1.. |
//! |-------|-----|-------|
//! | InvalidArgument | argument number | |
//! | InvalidCapability | capability number | |
//! | RangeError | min | max |
//! | FailedLookup | 1 if the source lookup failed | lookup failure words |
//! | NotEnoughMemory | bytes available | |

use core::fmt;

use sable_cap::{CapError, LookupFault, ObjectRef};
use sable_syscall::{MessageInfo, SyscallErrorKind};

use crate::object::context::{BADGE_REG, MSG_INFO_REG};
use crate::KernelState;

/// Error returned to the invoker of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallError {
    InvalidArgument { argument: u64 },
    InvalidCapability { argument: u64 },
    IllegalOperation,
    RangeError { min: u64, max: u64 },
    AlignmentError,
    FailedLookup { source: bool, lookup: LookupFault },
    TruncatedMessage,
    DeleteFirst,
    RevokeFirst,
    NotEnoughMemory { available: u64 },
}

impl SyscallError {
    pub const fn kind(&self) -> SyscallErrorKind {
        match self {
            Self::InvalidArgument { .. } => SyscallErrorKind::InvalidArgument,
            Self::InvalidCapability { .. } => SyscallErrorKind::InvalidCapability,
            Self::IllegalOperation => SyscallErrorKind::IllegalOperation,
            Self::RangeError { .. } => SyscallErrorKind::RangeError,
            Self::AlignmentError => SyscallErrorKind::AlignmentError,
            Self::FailedLookup { .. } => SyscallErrorKind::FailedLookup,
            Self::TruncatedMessage => SyscallErrorKind::TruncatedMessage,
            Self::DeleteFirst => SyscallErrorKind::DeleteFirst,
            Self::RevokeFirst => SyscallErrorKind::RevokeFirst,
            Self::NotEnoughMemory { .. } => SyscallErrorKind::NotEnoughMemory,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// A lookup that consumed fewer bits than asked for.
    pub const fn depth_mismatch(source: bool, bits_left: u32) -> Self {
        Self::FailedLookup {
            source,
            lookup: LookupFault::DepthMismatch {
                bits_found: 0,
                bits_left,
            },
        }
    }
}

impl From<CapError> for SyscallError {
    fn from(e: CapError) -> Self {
        match e {
            CapError::DeleteFirst => Self::DeleteFirst,
            CapError::RevokeFirst => Self::RevokeFirst,
            CapError::IllegalOperation => Self::IllegalOperation,
        }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { argument } => write!(f, "invalid argument {}", argument),
            Self::InvalidCapability { argument } => write!(f, "invalid capability {}", argument),
            Self::RangeError { min, max } => write!(f, "value not in {}..={}", min, max),
            Self::FailedLookup { source, lookup } => write!(
                f,
                "{} lookup failed: {}",
                if *source { "source" } else { "destination" },
                lookup
            ),
            Self::NotEnoughMemory { available } => {
                write!(f, "not enough memory ({} bytes left)", available)
            }
            other => f.write_str(other.name()),
        }
    }
}

impl KernelState {
    /// Reply to `thread` with `error`.
    pub(crate) fn reply_from_kernel_error(&mut self, thread: ObjectRef, error: SyscallError) {
        let buffer = self.lookup_ipc_buffer(true, thread);
        self.objects.tcb_mut(thread).context.set(BADGE_REG, 0);
        let length = match error {
            SyscallError::InvalidArgument { argument }
            | SyscallError::InvalidCapability { argument } => {
                self.set_mr(thread, buffer, 0, argument)
            }
            SyscallError::RangeError { min, max } => {
                self.set_mr(thread, buffer, 0, min);
                self.set_mr(thread, buffer, 1, max)
            }
            SyscallError::FailedLookup { source, lookup } => {
                self.set_mr(thread, buffer, 0, u64::from(source));
                self.set_mrs_lookup_failure(thread, buffer, lookup, 1)
            }
            SyscallError::NotEnoughMemory { available } => {
                self.set_mr(thread, buffer, 0, available)
            }
            SyscallError::IllegalOperation
            | SyscallError::AlignmentError
            | SyscallError::TruncatedMessage
            | SyscallError::DeleteFirst
            | SyscallError::RevokeFirst => 0,
        };
        let info = MessageInfo::new(error.kind().as_u64(), 0, 0, length as u64);
        self.objects
            .tcb_mut(thread)
            .context
            .set(MSG_INFO_REG, info.to_word());
    }

    /// Reply to `thread` with an empty message.
    pub(crate) fn reply_from_kernel_success_empty(&mut self, thread: ObjectRef) {
        let ctx = &mut self.objects.tcb_mut(thread).context;
        ctx.set(BADGE_REG, 0);
        ctx.set(MSG_INFO_REG, MessageInfo::new(0, 0, 0, 0).to_word());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_errors_map_to_syscall_errors() {
        assert_eq!(SyscallError::from(CapError::RevokeFirst), SyscallError::RevokeFirst);
        assert_eq!(
            SyscallError::from(CapError::IllegalOperation).kind().as_u64(),
            3
        );
    }

    #[test]
    fn test_display() {
        let e = SyscallError::NotEnoughMemory { available: 61440 };
        assert_eq!(e.to_string(), "not enough memory (61440 bytes left)");
        assert_eq!(SyscallError::DeleteFirst.to_string(), "DeleteFirst");
    }
}
