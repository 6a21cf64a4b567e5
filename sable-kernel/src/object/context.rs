//! User register file
//!
//! An architecture-neutral image of a thread's user registers, saved and
//! restored by the trap layer. The kernel only reads and writes the named
//! roles below.

use sable_syscall::N_MSG_REGISTERS;

/// Number of saved registers.
pub const NUM_REGISTERS: usize = 21;

/// General-purpose registers `X0..X15` are `0..16`.
pub const X0: usize = 0;
pub const X1: usize = 1;
pub const X2: usize = 2;
pub const X3: usize = 3;
pub const X4: usize = 4;
pub const X5: usize = 5;
pub const X6: usize = 6;
pub const X7: usize = 7;
pub const X8: usize = 8;
pub const X9: usize = 9;
pub const X10: usize = 10;
pub const X11: usize = 11;
pub const X12: usize = 12;
pub const X13: usize = 13;
pub const X14: usize = 14;
pub const X15: usize = 15;
/// User stack pointer.
pub const SP: usize = 16;
/// Address execution resumes at.
pub const NEXT_IP: usize = 17;
/// Address of the trapping instruction.
pub const FAULT_IP: usize = 18;
/// Processor flags.
pub const FLAGS: usize = 19;
/// Thread-local storage base.
pub const TLS_BASE: usize = 20;

/// Capability pointer of a syscall.
pub const CAP_REG: usize = X0;
/// Badge delivered with a message.
pub const BADGE_REG: usize = X0;
/// Message-info word.
pub const MSG_INFO_REG: usize = X1;
/// Message registers passed in machine registers.
pub const MSG_REGISTERS: [usize; N_MSG_REGISTERS] = [X2, X3, X4, X5];

/// Registers visible through TCB ReadRegisters/WriteRegisters, in order:
/// the frame registers first, then the general-purpose ones.
pub const FRAME_REGISTERS: [usize; 11] = [FAULT_IP, SP, FLAGS, X0, X1, X2, X3, X4, X5, X6, X7];
pub const GP_REGISTERS: [usize; 9] = [X8, X9, X10, X11, X12, X13, X14, X15, TLS_BASE];

/// Flag bits user code may set.
pub const USER_FLAGS_MASK: u64 = 0xF000_0000;

/// Registers sent in an unknown-syscall fault message, after the message
/// registers.
pub const SYSCALL_MESSAGE: [usize; 8] = [X2, X3, X4, X5, FAULT_IP, SP, CAP_REG, MSG_INFO_REG];

/// Registers sent in a user-exception fault message.
pub const EXCEPTION_MESSAGE: [usize; 2] = [FAULT_IP, SP];

/// Saved user registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserContext {
    regs: [u64; NUM_REGISTERS],
}

impl Default for UserContext {
    fn default() -> Self {
        Self::new()
    }
}

impl UserContext {
    /// All registers zero.
    pub const fn new() -> Self {
        Self {
            regs: [0; NUM_REGISTERS],
        }
    }

    #[inline]
    pub fn get(&self, reg: usize) -> u64 {
        self.regs[reg]
    }

    /// Set a register, dropping flag bits user code may not control.
    #[inline]
    pub fn set(&mut self, reg: usize, value: u64) {
        self.regs[reg] = if reg == FLAGS {
            value & USER_FLAGS_MASK
        } else {
            value
        };
    }

    /// Restart address after a syscall or fault.
    #[inline]
    pub fn restart_pc(&self) -> u64 {
        self.regs[FAULT_IP]
    }

    /// Make the thread re-execute its trapping instruction.
    #[inline]
    pub fn rewind(&mut self) {
        self.regs[NEXT_IP] = self.regs[FAULT_IP];
    }

    /// Record the resume point as the restart point.
    #[inline]
    pub fn commit_next_ip(&mut self) {
        self.regs[FAULT_IP] = self.regs[NEXT_IP];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_sanitised() {
        let mut ctx = UserContext::new();
        ctx.set(FLAGS, u64::MAX);
        assert_eq!(ctx.get(FLAGS), USER_FLAGS_MASK);
        ctx.set(X3, u64::MAX);
        assert_eq!(ctx.get(X3), u64::MAX);
    }

    #[test]
    fn test_rewind() {
        let mut ctx = UserContext::new();
        ctx.set(FAULT_IP, 0x1000);
        ctx.set(NEXT_IP, 0x1004);
        ctx.rewind();
        assert_eq!(ctx.get(NEXT_IP), 0x1000);
    }
}
