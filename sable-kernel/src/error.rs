//! Categorical kernel results
//!
//! Kernel operations fail in one of four ways. A syscall error is
//! reported to the invoker; a lookup failure or fault is delivered to the
//! thread's fault handler; preemption unwinds to the syscall boundary so
//! the operation can be re-issued.

use core::fmt;

use sable_cap::{CapError, LookupFault};

use crate::fault::Fault;
use crate::syscall::SyscallError;

/// A long-running operation stopped at a preemption point.
///
/// Every state change made before the point is complete and consistent;
/// re-issuing the operation continues where it left off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Preempted;

impl fmt::Display for Preempted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("preempted")
    }
}

/// Kernel operation failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// Reported to the invoker as an error reply.
    Syscall(SyscallError),
    /// The invoked capability could not be found.
    Lookup(LookupFault),
    /// The invoking thread faulted.
    Fault(Fault),
    /// Interrupt pending; unwind and retry later.
    Preempted,
}

/// Kernel operation result.
pub type KernelResult<T = ()> = Result<T, KernelError>;

impl KernelError {
    /// Get the error name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Syscall(e) => e.name(),
            Self::Lookup(l) => l.name(),
            Self::Fault(f) => f.name(),
            Self::Preempted => "Preempted",
        }
    }
}

impl From<Preempted> for KernelError {
    fn from(_: Preempted) -> Self {
        Self::Preempted
    }
}

impl From<SyscallError> for KernelError {
    fn from(e: SyscallError) -> Self {
        Self::Syscall(e)
    }
}

impl From<CapError> for KernelError {
    fn from(e: CapError) -> Self {
        Self::Syscall(e.into())
    }
}

impl From<LookupFault> for KernelError {
    fn from(l: LookupFault) -> Self {
        Self::Lookup(l)
    }
}

impl From<Fault> for KernelError {
    fn from(f: Fault) -> Self {
        Self::Fault(f)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syscall(e) => write!(f, "syscall error: {e}"),
            Self::Lookup(l) => write!(f, "lookup failure: {l}"),
            Self::Fault(fault) => write!(f, "fault: {fault}"),
            Self::Preempted => f.write_str("preempted"),
        }
    }
}
