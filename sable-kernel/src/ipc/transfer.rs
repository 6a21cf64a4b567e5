//! Message transfer between threads
//!
//! The first [`N_MSG_REGISTERS`] message words travel in registers, the
//! rest through the two threads' IPC buffers. A sender with a pending
//! fault sends the fault instead of a message.
//!
//! # Capability Transfer
//!
//! A sender holding grant rights may send up to three extra capabilities.
//! A capability to the very endpoint the message crosses is "unwrapped":
//! the receiver gets its badge in the buffer instead of the capability.
//! At most one capability is actually copied, into the receive slot the
//! receiver named in its buffer.

use sable_cap::{Badge, Cap, CdtOps, ObjectRef, SlotRef, SlotStore};
use sable_common::PhysAddr;
use sable_syscall::ipc_buffer::{
    CAPS_OFFSET, RECEIVE_CNODE_OFFSET, RECEIVE_DEPTH_OFFSET, RECEIVE_INDEX_OFFSET,
};
use sable_syscall::{MessageInfo, N_MSG_REGISTERS};

use crate::cap::cspace::ExtraCaps;
use crate::object::context::{BADGE_REG, MSG_INFO_REG, MSG_REGISTERS};
use crate::KernelState;

impl KernelState {
    pub(crate) fn read_buffer_word(&self, buffer: PhysAddr, index: usize) -> u64 {
        self.machine.read_word(buffer.offset(index as u64 * 8))
    }

    pub(crate) fn write_buffer_word(&mut self, buffer: PhysAddr, index: usize, value: u64) {
        self.machine.write_word(buffer.offset(index as u64 * 8), value);
    }

    /// Set message register `offset` of `receiver`. Returns the message
    /// length this makes, which stops at the register count when there is
    /// no buffer.
    pub(crate) fn set_mr(
        &mut self,
        receiver: ObjectRef,
        buffer: Option<PhysAddr>,
        offset: usize,
        value: u64,
    ) -> usize {
        if offset < N_MSG_REGISTERS {
            self.objects
                .tcb_mut(receiver)
                .context
                .set(MSG_REGISTERS[offset], value);
            offset + 1
        } else if let Some(buffer) = buffer {
            self.write_buffer_word(buffer, offset + 1, value);
            offset + 1
        } else {
            N_MSG_REGISTERS
        }
    }

    /// Message register `index` of `thread`.
    pub(crate) fn get_mr(&self, thread: ObjectRef, buffer: Option<PhysAddr>, index: usize) -> u64 {
        if index < N_MSG_REGISTERS {
            self.objects.tcb(thread).context.get(MSG_REGISTERS[index])
        } else {
            buffer.map_or(0, |buffer| self.read_buffer_word(buffer, index + 1))
        }
    }

    /// Transfer a message, or the sender's fault, to `receiver`.
    pub fn do_ipc_transfer(
        &mut self,
        sender: ObjectRef,
        endpoint: Option<ObjectRef>,
        badge: Badge,
        can_grant: bool,
        receiver: ObjectRef,
    ) {
        let receive_buffer = self.lookup_ipc_buffer(true, receiver);
        if self.objects.tcb(sender).fault.is_null() {
            let send_buffer = self.lookup_ipc_buffer(false, sender);
            self.do_normal_transfer(
                sender,
                send_buffer,
                endpoint,
                badge,
                can_grant,
                receiver,
                receive_buffer,
            );
        } else {
            self.do_fault_transfer(badge, sender, receiver, receive_buffer);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn do_normal_transfer(
        &mut self,
        sender: ObjectRef,
        send_buffer: Option<PhysAddr>,
        endpoint: Option<ObjectRef>,
        badge: Badge,
        can_grant: bool,
        receiver: ObjectRef,
        receive_buffer: Option<PhysAddr>,
    ) {
        let tag = MessageInfo::from_word(self.objects.tcb(sender).context.get(MSG_INFO_REG));
        let caps = if can_grant {
            // A failed lookup sends the message without capabilities.
            self.lookup_extra_caps(sender, send_buffer, tag)
                .unwrap_or([None; 3])
        } else {
            [None; 3]
        };

        let transferred = self.copy_mrs(
            sender,
            send_buffer,
            receiver,
            receive_buffer,
            tag.length as usize,
        );
        let mut tag = self.transfer_caps(tag, &caps, endpoint, receiver, receive_buffer);
        tag.length = transferred as u64;

        let ctx = &mut self.objects.tcb_mut(receiver).context;
        ctx.set(MSG_INFO_REG, tag.to_word());
        ctx.set(BADGE_REG, badge.value());
    }

    fn do_fault_transfer(
        &mut self,
        badge: Badge,
        sender: ObjectRef,
        receiver: ObjectRef,
        receive_buffer: Option<PhysAddr>,
    ) {
        let sent = self.set_mrs_fault(sender, receiver, receive_buffer);
        let label = self.objects.tcb(sender).fault.label() as u64;
        let info = MessageInfo::new(label, 0, 0, sent as u64);
        let ctx = &mut self.objects.tcb_mut(receiver).context;
        ctx.set(MSG_INFO_REG, info.to_word());
        ctx.set(BADGE_REG, badge.value());
    }

    /// Copy `n` message words. Words past the registers need both buffers.
    /// Returns the number of words copied.
    pub(crate) fn copy_mrs(
        &mut self,
        sender: ObjectRef,
        send_buffer: Option<PhysAddr>,
        receiver: ObjectRef,
        receive_buffer: Option<PhysAddr>,
        n: usize,
    ) -> usize {
        let sender_ctx = self.objects.tcb(sender).context;
        let in_registers = n.min(N_MSG_REGISTERS);
        for &reg in &MSG_REGISTERS[..in_registers] {
            self.objects
                .tcb_mut(receiver)
                .context
                .set(reg, sender_ctx.get(reg));
        }
        let (Some(send_buffer), Some(receive_buffer)) = (send_buffer, receive_buffer) else {
            return in_registers;
        };
        for i in in_registers..n {
            let word = self.read_buffer_word(send_buffer, i + 1);
            self.write_buffer_word(receive_buffer, i + 1, word);
        }
        n
    }

    fn transfer_caps(
        &mut self,
        mut info: MessageInfo,
        caps: &ExtraCaps,
        endpoint: Option<ObjectRef>,
        receiver: ObjectRef,
        receive_buffer: Option<PhysAddr>,
    ) -> MessageInfo {
        info.extra_caps = 0;
        info.caps_unwrapped = 0;
        let (Some(_), Some(buffer)) = (caps[0], receive_buffer) else {
            return info;
        };

        let mut dest = self.get_receive_slot(receiver, buffer);
        let mut sent = 0;
        for (i, slot) in caps.iter().enumerate() {
            let Some(slot) = *slot else { break };
            let cap = self.objects.cte(slot).cap;
            match cap {
                Cap::Endpoint { object, badge, .. } if Some(object) == endpoint => {
                    self.write_buffer_word(buffer, CAPS_OFFSET + i, badge.value());
                    info.caps_unwrapped |= 1 << i;
                }
                _ => {
                    let Some(dest_slot) = dest else { break };
                    let derived = match self.derive_cap(slot, cap) {
                        Ok(Cap::Null) | Err(_) => break,
                        Ok(derived) => derived,
                    };
                    self.objects.cte_insert(derived, slot, dest_slot);
                    log::debug!("ipc: granted {} to {} at {}", derived, receiver, dest_slot);
                    dest = None;
                }
            }
            sent = i + 1;
        }
        info.extra_caps = sent as u64;
        info
    }

    /// The empty slot `receiver` named to receive a capability into.
    fn get_receive_slot(&self, receiver: ObjectRef, buffer: PhysAddr) -> Option<SlotRef> {
        let cnode_cptr = self.read_buffer_word(buffer, RECEIVE_CNODE_OFFSET);
        let index = self.read_buffer_word(buffer, RECEIVE_INDEX_OFFSET);
        let depth = self.read_buffer_word(buffer, RECEIVE_DEPTH_OFFSET);
        let cnode = self.lookup_cap(receiver, cnode_cptr).ok()?;
        let slot = self.lookup_target_slot(cnode, index, depth).ok()?;
        self.objects.cte(slot).is_empty().then_some(slot)
    }

    /// A non-blocking receive found nothing.
    pub(crate) fn do_nb_recv_failed_transfer(&mut self, thread: ObjectRef) {
        self.objects.tcb_mut(thread).context.set(BADGE_REG, 0);
    }
}
