//! Fault messages
//!
//! When a thread faults, the kernel sends a message on the thread's fault
//! endpoint on its behalf. The label identifies the fault and the message
//! registers carry its details, at the word indices below.

/// Fault message labels.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultLabel {
    /// No fault.
    Null = 0,
    /// Capability lookup failed during a syscall.
    CapFault = 1,
    /// Unknown syscall number.
    UnknownSyscall = 2,
    /// Architecture exception (undefined instruction, alignment, ...).
    UserException = 3,
    /// Virtual memory fault.
    VmFault = 4,
}

impl FaultLabel {
    /// Get the label name for logging.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::CapFault => "CapFault",
            Self::UnknownSyscall => "UnknownSyscall",
            Self::UserException => "UserException",
            Self::VmFault => "VmFault",
        }
    }
}

/// Cap fault message words.
pub mod cap_fault {
    /// Instruction to restart at.
    pub const IP: usize = 0;
    /// CPtr that failed to resolve.
    pub const ADDR: usize = 1;
    /// Non-zero if the fault happened in the receive phase.
    pub const IN_RECV_PHASE: usize = 2;
    /// First word of the encoded lookup failure.
    pub const LOOKUP_FAILURE_TYPE: usize = 3;
}

/// Unknown syscall message words.
pub mod unknown_syscall {
    /// Message registers 0..4 at the time of the syscall.
    pub const MSG0: usize = 0;
    /// Faulting instruction.
    pub const FAULT_IP: usize = 4;
    /// Stack pointer.
    pub const SP: usize = 5;
    /// Cap register.
    pub const CAP_REG: usize = 6;
    /// Message-info register.
    pub const MSG_INFO_REG: usize = 7;
    /// Syscall number.
    pub const SYSCALL: usize = 8;
    /// Message length.
    pub const LENGTH: u64 = 9;
}

/// User exception message words.
pub mod user_exception {
    /// Faulting instruction.
    pub const FAULT_IP: usize = 0;
    /// Stack pointer.
    pub const SP: usize = 1;
    /// Exception number.
    pub const NUMBER: usize = 2;
    /// Exception code.
    pub const CODE: usize = 3;
    /// Message length.
    pub const LENGTH: u64 = 4;
}

/// VM fault message words.
pub mod vm_fault {
    /// Faulting instruction.
    pub const IP: usize = 0;
    /// Faulting address.
    pub const ADDR: usize = 1;
    /// Non-zero for an instruction fetch fault.
    pub const PREFETCH_FAULT: usize = 2;
    /// Fault status register.
    pub const FSR: usize = 3;
    /// Message length.
    pub const LENGTH: u64 = 4;
}

/// Words a fault handler may reply with to update registers.
pub mod reply {
    /// Unknown syscall reply: message registers 0..4, then FaultIP, SP.
    pub const UNKNOWN_SYSCALL_LENGTH: u64 = 6;
    /// User exception reply: FaultIP, SP.
    pub const USER_EXCEPTION_LENGTH: u64 = 2;
}
