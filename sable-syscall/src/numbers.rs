//! Syscall numbers
//!
//! Seven IPC system calls plus Yield. Everything else (capability
//! management, retype, thread control) is an invocation: a Send or Call
//! on a capability whose message label selects the operation.
//!
//! Register convention: the syscall number is passed in the syscall
//! register, the capability pointer in the cap register, the message-info
//! word in the info register, and the first message registers after it.

/// Syscall numbers.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syscall {
    /// Send on a capability, blocking until a receiver is ready.
    Send = 0,
    /// Send without blocking; dropped if nobody is waiting.
    NBSend = 1,
    /// Send and wait for the reply.
    Call = 2,
    /// Receive on an endpoint or notification, blocking.
    Recv = 3,
    /// Reply to the caller recorded in the caller slot.
    Reply = 4,
    /// Reply, then receive.
    ReplyRecv = 5,
    /// Receive without blocking.
    NBRecv = 6,
    /// Give up the rest of the time slice.
    Yield = 7,
}

impl Syscall {
    /// Try to convert from a raw syscall number.
    pub fn from_number(num: u64) -> Option<Self> {
        match num {
            0 => Some(Self::Send),
            1 => Some(Self::NBSend),
            2 => Some(Self::Call),
            3 => Some(Self::Recv),
            4 => Some(Self::Reply),
            5 => Some(Self::ReplyRecv),
            6 => Some(Self::NBRecv),
            7 => Some(Self::Yield),
            _ => None,
        }
    }

    /// Get the syscall name for logging.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Send => "Send",
            Self::NBSend => "NBSend",
            Self::Call => "Call",
            Self::Recv => "Recv",
            Self::Reply => "Reply",
            Self::ReplyRecv => "ReplyRecv",
            Self::NBRecv => "NBRecv",
            Self::Yield => "Yield",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syscall_numbers_round_trip() {
        for num in 0..8 {
            let sc = Syscall::from_number(num).unwrap();
            assert_eq!(sc as u64, num);
        }
        assert_eq!(Syscall::from_number(8), None);
    }
}
