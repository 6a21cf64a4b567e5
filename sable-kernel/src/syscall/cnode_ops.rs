//! CNode invocations
//!
//! - Revoke, Delete: remove capabilities
//! - Copy, Mint: derive a copy of a capability into an empty slot
//! - Move, Mutate: move a capability, optionally changing its badge or
//!   guard
//! - Rotate: move two capabilities in a cycle
//! - SaveCaller: keep the current reply capability
//! - CancelBadgedSends: abort queued sends carrying a badge
//!
//! # ABI
//!
//! Every operation names its target slot by MR0 (index) and MR1 (depth),
//! resolved from the invoked CNode. Operations that read a second slot
//! take its CNode as extra cap 0 and its index and depth from MR2 and MR3.

use sable_cap::{Cap, CapRights, CdtOps, LookupFault, SlotRef, SlotStore, TcbSlot};
use sable_syscall::InvocationLabel;

use super::invocation::Invocation;
use super::SyscallError;
use crate::object::tcb::tcb_slot;
use crate::{KernelResult, KernelState};

impl KernelState {
    pub(crate) fn decode_cnode_invocation(&mut self, inv: &Invocation) -> KernelResult {
        let label = inv.label;
        if !is_cnode_label(label) {
            log::warn!("cnode: illegal operation {}", label.name());
            return Err(SyscallError::IllegalOperation.into());
        }
        if inv.length < 2 {
            log::warn!("cnode: truncated message");
            return Err(SyscallError::TruncatedMessage.into());
        }
        let index = self.syscall_arg(inv, 0);
        let depth = self.syscall_arg(inv, 1);
        let dest = self.lookup_target_slot(inv.cap, index, depth)?;

        match label {
            InvocationLabel::CNodeCopy => self.decode_cnode_transfer(inv, Transfer::Copy, dest),
            InvocationLabel::CNodeMint => self.decode_cnode_transfer(inv, Transfer::Mint, dest),
            InvocationLabel::CNodeMove => self.decode_cnode_transfer(inv, Transfer::Move, dest),
            InvocationLabel::CNodeMutate => {
                self.decode_cnode_transfer(inv, Transfer::Mutate, dest)
            }
            InvocationLabel::CNodeRevoke => {
                self.restart_invoker(inv);
                self.cte_revoke(dest)?;
                Ok(())
            }
            InvocationLabel::CNodeDelete => {
                self.restart_invoker(inv);
                self.cte_delete(dest, true)?;
                Ok(())
            }
            InvocationLabel::CNodeSaveCaller => {
                self.objects.ensure_empty_slot(dest)?;
                self.restart_invoker(inv);
                self.save_caller(inv, dest);
                Ok(())
            }
            InvocationLabel::CNodeCancelBadgedSends => {
                let cap = self.objects.cte(dest).cap;
                if !cap.has_cancel_send_rights() {
                    log::warn!("cnode: cancel badged sends on {}", cap);
                    return Err(SyscallError::IllegalOperation.into());
                }
                self.restart_invoker(inv);
                if let Cap::Endpoint { object, badge, .. } = cap {
                    if badge.is_some() {
                        self.cancel_badged_sends(object, badge);
                    }
                }
                Ok(())
            }
            InvocationLabel::CNodeRotate => self.decode_cnode_rotate(inv, dest),
            other => {
                log::warn!("cnode: illegal operation {}", other.name());
                Err(SyscallError::IllegalOperation.into())
            }
        }
    }

    /// Copy, Mint, Move and Mutate.
    fn decode_cnode_transfer(
        &mut self,
        inv: &Invocation,
        op: Transfer,
        dest: SlotRef,
    ) -> KernelResult {
        let src_root = self.extra_cap(inv, 0);
        let Some((src_root, _)) = src_root.filter(|_| inv.length >= 4) else {
            log::warn!("cnode: truncated message");
            return Err(SyscallError::TruncatedMessage.into());
        };
        let src_index = self.syscall_arg(inv, 2);
        let src_depth = self.syscall_arg(inv, 3);

        if let Err(e) = self.objects.ensure_empty_slot(dest) {
            log::warn!("cnode: destination {} is occupied", dest);
            return Err(e.into());
        }
        let src = self.lookup_source_slot(src_root, src_index, src_depth)?;
        let src_cap = self.objects.cte(src).cap;
        if src_cap.is_null() {
            log::warn!("cnode: source {} is empty", src);
            return Err(SyscallError::FailedLookup {
                source: true,
                lookup: LookupFault::MissingCapability {
                    bits_left: src_depth as u32,
                },
            }
            .into());
        }

        let (new_cap, is_move) = match op {
            Transfer::Copy => {
                if inv.length < 5 {
                    return Err(SyscallError::TruncatedMessage.into());
                }
                let rights = CapRights::from_word(self.syscall_arg(inv, 4));
                (self.derive_cap(src, src_cap.mask_rights(rights))?, false)
            }
            Transfer::Mint => {
                if inv.length < 6 {
                    return Err(SyscallError::TruncatedMessage.into());
                }
                let rights = CapRights::from_word(self.syscall_arg(inv, 4));
                let data = self.syscall_arg(inv, 5);
                let minted = src_cap.mask_rights(rights).update_data(false, data);
                (self.derive_cap(src, minted)?, false)
            }
            Transfer::Move => (src_cap, true),
            Transfer::Mutate => {
                if inv.length < 5 {
                    return Err(SyscallError::TruncatedMessage.into());
                }
                let data = self.syscall_arg(inv, 4);
                (src_cap.update_data(true, data), true)
            }
        };
        if new_cap.is_null() {
            log::warn!("cnode: {:?} of {} yields nothing", op, src_cap);
            return Err(SyscallError::IllegalOperation.into());
        }

        self.restart_invoker(inv);
        if is_move {
            self.objects.cte_move(new_cap, src, dest);
        } else {
            self.objects.cte_insert(new_cap, src, dest);
        }
        Ok(())
    }

    /// Rotate: pivot moves to the destination, source moves to the pivot.
    ///
    /// # ABI
    ///
    /// - MR2..MR4: new pivot data, pivot index and depth (from extra cap 0)
    /// - MR5..MR7: new source data, source index and depth (from extra cap 1)
    fn decode_cnode_rotate(&mut self, inv: &Invocation, dest: SlotRef) -> KernelResult {
        let roots = (self.extra_cap(inv, 0), self.extra_cap(inv, 1));
        let (Some((pivot_root, _)), Some((src_root, _)), true) = (roots.0, roots.1, inv.length >= 8)
        else {
            log::warn!("cnode: truncated message");
            return Err(SyscallError::TruncatedMessage.into());
        };
        let pivot_data = self.syscall_arg(inv, 2);
        let pivot_index = self.syscall_arg(inv, 3);
        let pivot_depth = self.syscall_arg(inv, 4);
        let src_data = self.syscall_arg(inv, 5);
        let src_index = self.syscall_arg(inv, 6);
        let src_depth = self.syscall_arg(inv, 7);

        let src = self.lookup_source_slot(src_root, src_index, src_depth)?;
        let pivot = self.lookup_pivot_slot(pivot_root, pivot_index, pivot_depth)?;
        if pivot == src || pivot == dest {
            log::warn!("cnode: rotate through {} twice", pivot);
            return Err(SyscallError::IllegalOperation.into());
        }
        if src != dest {
            self.objects.ensure_empty_slot(dest)?;
        }

        let src_cap = self.objects.cte(src).cap;
        if src_cap.is_null() {
            return Err(SyscallError::FailedLookup {
                source: true,
                lookup: LookupFault::MissingCapability {
                    bits_left: src_depth as u32,
                },
            }
            .into());
        }
        let pivot_cap = self.objects.cte(pivot).cap;
        if pivot_cap.is_null() {
            return Err(SyscallError::FailedLookup {
                source: false,
                lookup: LookupFault::MissingCapability {
                    bits_left: pivot_depth as u32,
                },
            }
            .into());
        }

        let new_src = src_cap.update_data(true, src_data);
        let new_pivot = pivot_cap.update_data(true, pivot_data);
        if new_src.is_null() || new_pivot.is_null() {
            return Err(SyscallError::IllegalOperation.into());
        }

        self.restart_invoker(inv);
        if src == dest {
            self.objects.cte_swap(new_src, src, new_pivot, pivot);
        } else {
            self.objects.cte_move(new_pivot, pivot, dest);
            self.objects.cte_move(new_src, src, pivot);
        }
        Ok(())
    }

    fn save_caller(&mut self, inv: &Invocation, dest: SlotRef) {
        let caller = tcb_slot(inv.thread, TcbSlot::Caller);
        match self.objects.cte(caller).cap {
            Cap::Null => log::debug!("cnode: save caller with no caller"),
            cap @ Cap::Reply { master: false, .. } => self.objects.cte_move(cap, caller, dest),
            other => panic!("caller slot of {} holds {other}", inv.thread),
        }
    }
}

/// The four operations that place a capability in an empty slot.
#[derive(Clone, Copy, Debug)]
enum Transfer {
    Copy,
    Mint,
    Move,
    Mutate,
}

const fn is_cnode_label(label: InvocationLabel) -> bool {
    let raw = label.as_u64();
    raw >= InvocationLabel::CNodeRevoke.as_u64() && raw <= InvocationLabel::CNodeSaveCaller.as_u64()
}
