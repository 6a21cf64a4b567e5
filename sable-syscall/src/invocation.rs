//! Object invocation labels
//!
//! A Send or Call on a capability to a kernel object is an invocation; the
//! message label selects the operation. Labels form one flat numbering
//! across all object types; the kernel rejects a label that does not
//! belong to the invoked object's type with `IllegalOperation`.

/// Invocation labels.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvocationLabel {
    /// Not a valid label.
    InvalidInvocation = 0,

    // === Untyped ===
    /// Create objects from an untyped region.
    UntypedRetype = 1,

    // === TCB ===
    /// Read registers into the reply.
    TcbReadRegisters = 2,
    /// Write registers from the message.
    TcbWriteRegisters = 3,
    /// Copy registers from another thread.
    TcbCopyRegisters = 4,
    /// Set fault endpoint, CSpace, VSpace and IPC buffer.
    TcbConfigure = 5,
    /// Set priority.
    TcbSetPriority = 6,
    /// Set maximum controlled priority.
    TcbSetMCPriority = 7,
    /// Set priority and MCP together.
    TcbSetSchedParams = 8,
    /// Set IPC buffer.
    TcbSetIPCBuffer = 9,
    /// Set fault endpoint, CSpace and VSpace.
    TcbSetSpace = 10,
    /// Stop the thread.
    TcbSuspend = 11,
    /// Restart a stopped thread.
    TcbResume = 12,
    /// Bind a notification.
    TcbBindNotification = 13,
    /// Unbind the bound notification.
    TcbUnbindNotification = 14,
    /// Move the thread to another core.
    TcbSetAffinity = 15,
    /// Set the TLS base register.
    TcbSetTLSBase = 16,

    // === CNode ===
    /// Delete all children of a capability.
    CNodeRevoke = 17,
    /// Delete one capability.
    CNodeDelete = 18,
    /// Cancel queued sends carrying the capability's badge.
    CNodeCancelBadgedSends = 19,
    /// Copy with reduced rights.
    CNodeCopy = 20,
    /// Copy with reduced rights and new badge or guard.
    CNodeMint = 21,
    /// Move.
    CNodeMove = 22,
    /// Move with new badge or guard.
    CNodeMutate = 23,
    /// Move two capabilities in a cycle.
    CNodeRotate = 24,
    /// Move the caller capability into a CNode slot.
    CNodeSaveCaller = 25,

    // === IRQ ===
    /// Create an IRQ handler capability.
    IrqIssueIrqHandler = 26,
    /// Unmask the interrupt line.
    IrqAckIrq = 27,
    /// Set the notification signalled by the line.
    IrqSetIrqHandler = 28,
    /// Remove the notification.
    IrqClearIrqHandler = 29,

    // === Domain ===
    /// Move a thread to another scheduling domain.
    DomainSetSet = 30,

    // === Address space ===
    /// Map a frame.
    FrameMap = 31,
    /// Unmap a frame.
    FrameUnmap = 32,
    /// Return the frame's physical address.
    FrameGetAddress = 33,
    /// Map a page table.
    PageTableMap = 34,
    /// Unmap a page table.
    PageTableUnmap = 35,
}

impl InvocationLabel {
    /// Decode a message label.
    pub fn from_label(label: u64) -> Self {
        match label {
            1 => Self::UntypedRetype,
            2 => Self::TcbReadRegisters,
            3 => Self::TcbWriteRegisters,
            4 => Self::TcbCopyRegisters,
            5 => Self::TcbConfigure,
            6 => Self::TcbSetPriority,
            7 => Self::TcbSetMCPriority,
            8 => Self::TcbSetSchedParams,
            9 => Self::TcbSetIPCBuffer,
            10 => Self::TcbSetSpace,
            11 => Self::TcbSuspend,
            12 => Self::TcbResume,
            13 => Self::TcbBindNotification,
            14 => Self::TcbUnbindNotification,
            15 => Self::TcbSetAffinity,
            16 => Self::TcbSetTLSBase,
            17 => Self::CNodeRevoke,
            18 => Self::CNodeDelete,
            19 => Self::CNodeCancelBadgedSends,
            20 => Self::CNodeCopy,
            21 => Self::CNodeMint,
            22 => Self::CNodeMove,
            23 => Self::CNodeMutate,
            24 => Self::CNodeRotate,
            25 => Self::CNodeSaveCaller,
            26 => Self::IrqIssueIrqHandler,
            27 => Self::IrqAckIrq,
            28 => Self::IrqSetIrqHandler,
            29 => Self::IrqClearIrqHandler,
            30 => Self::DomainSetSet,
            31 => Self::FrameMap,
            32 => Self::FrameUnmap,
            33 => Self::FrameGetAddress,
            34 => Self::PageTableMap,
            35 => Self::PageTableUnmap,
            _ => Self::InvalidInvocation,
        }
    }

    /// Raw label value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self as u64
    }

    /// Get the label name for logging.
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvalidInvocation => "InvalidInvocation",
            Self::UntypedRetype => "UntypedRetype",
            Self::TcbReadRegisters => "TcbReadRegisters",
            Self::TcbWriteRegisters => "TcbWriteRegisters",
            Self::TcbCopyRegisters => "TcbCopyRegisters",
            Self::TcbConfigure => "TcbConfigure",
            Self::TcbSetPriority => "TcbSetPriority",
            Self::TcbSetMCPriority => "TcbSetMCPriority",
            Self::TcbSetSchedParams => "TcbSetSchedParams",
            Self::TcbSetIPCBuffer => "TcbSetIPCBuffer",
            Self::TcbSetSpace => "TcbSetSpace",
            Self::TcbSuspend => "TcbSuspend",
            Self::TcbResume => "TcbResume",
            Self::TcbBindNotification => "TcbBindNotification",
            Self::TcbUnbindNotification => "TcbUnbindNotification",
            Self::TcbSetAffinity => "TcbSetAffinity",
            Self::TcbSetTLSBase => "TcbSetTLSBase",
            Self::CNodeRevoke => "CNodeRevoke",
            Self::CNodeDelete => "CNodeDelete",
            Self::CNodeCancelBadgedSends => "CNodeCancelBadgedSends",
            Self::CNodeCopy => "CNodeCopy",
            Self::CNodeMint => "CNodeMint",
            Self::CNodeMove => "CNodeMove",
            Self::CNodeMutate => "CNodeMutate",
            Self::CNodeRotate => "CNodeRotate",
            Self::CNodeSaveCaller => "CNodeSaveCaller",
            Self::IrqIssueIrqHandler => "IrqIssueIrqHandler",
            Self::IrqAckIrq => "IrqAckIrq",
            Self::IrqSetIrqHandler => "IrqSetIrqHandler",
            Self::IrqClearIrqHandler => "IrqClearIrqHandler",
            Self::DomainSetSet => "DomainSetSet",
            Self::FrameMap => "FrameMap",
            Self::FrameUnmap => "FrameUnmap",
            Self::FrameGetAddress => "FrameGetAddress",
            Self::PageTableMap => "PageTableMap",
            Self::PageTableUnmap => "PageTableUnmap",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip() {
        for label in 1..=35 {
            assert_eq!(InvocationLabel::from_label(label).as_u64(), label);
        }
        assert_eq!(
            InvocationLabel::from_label(0),
            InvocationLabel::InvalidInvocation
        );
        assert_eq!(
            InvocationLabel::from_label(1000),
            InvocationLabel::InvalidInvocation
        );
    }
}
