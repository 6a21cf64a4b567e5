//! Deletion and revocation
//!
//! Deleting a capability finalises it: the last capability to an object
//! tears down the object's kernel state (queued IPC, bindings, mappings).
//! Objects that own slots (CNodes and TCBs) cannot be emptied in one step;
//! their capability is replaced by a Zombie that is reduced one slot at a
//! time, with a preemption point between slots.
//!
//! # Preemption
//!
//! [`KernelState::cte_delete`] and [`KernelState::cte_revoke`] may return
//! [`Preempted`] part-way. Every step leaves the derivation tree
//! consistent, so the operation is resumed by issuing it again.
//!
//! # Cyclic Zombies
//!
//! A CNode that contains a capability to itself ends up with a Zombie in
//! its own slot 0. Non-immediate finalisation stops there instead of
//! recursing, leaving the outer delete to finish the job.

use sable_cap::{Cap, CdtOps, IrqState, ObjectRef, SlotRef, SlotStore, ZombieKind};

use crate::{KernelState, Preempted};

/// Result of finalising one capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Finalised {
    /// Null, or a Zombie still to be reduced.
    pub remainder: Cap,
    /// Capability whose deletion needs follow-up once the slot is empty.
    pub cleanup: Cap,
}

impl Finalised {
    const NULL: Self = Self {
        remainder: Cap::Null,
        cleanup: Cap::Null,
    };
}

const fn zombie_slot(object: ObjectRef) -> SlotRef {
    SlotRef::new(object, 0)
}

/// Whether `cap`, left in `slot` after finalisation, needs no further
/// work before the slot can be emptied.
fn cap_removable(cap: Cap, slot: SlotRef) -> bool {
    match cap {
        Cap::Null => true,
        Cap::Zombie { object, number, .. } => {
            number == 0 || (number == 1 && zombie_slot(object) == slot)
        }
        other => panic!("finalisation left {other} behind"),
    }
}

fn cap_cyclic_zombie(cap: Cap, slot: SlotRef) -> bool {
    matches!(cap, Cap::Zombie { object, .. } if zombie_slot(object) == slot)
}

impl KernelState {
    /// Delete the capability in `slot`.
    ///
    /// `exposed` is set when the slot is visible to user level; such a
    /// slot is always emptied, even if only a Zombie remained.
    pub fn cte_delete(&mut self, slot: SlotRef, exposed: bool) -> Result<(), Preempted> {
        let (success, cleanup) = self.finalise_slot(slot, exposed)?;
        if exposed || success {
            self.empty_slot(slot, cleanup);
        }
        Ok(())
    }

    fn finalise_slot(&mut self, slot: SlotRef, immediate: bool) -> Result<(bool, Cap), Preempted> {
        while !self.objects.cte(slot).is_empty() {
            let is_final = self.objects.is_final_capability(slot);
            let cap = self.objects.cte(slot).cap;
            let finalised = self.finalise_cap(cap, is_final, false);

            if cap_removable(finalised.remainder, slot) {
                return Ok((true, finalised.cleanup));
            }
            self.objects.cte_mut(slot).cap = finalised.remainder;

            if !immediate && cap_cyclic_zombie(finalised.remainder, slot) {
                return Ok((false, finalised.cleanup));
            }

            self.reduce_zombie(slot, immediate)?;
            self.preemption_point()?;
        }
        Ok((true, Cap::Null))
    }

    /// Shrink the Zombie in `slot` by one slot, or move it out of the way
    /// so its own slots can be deleted first.
    fn reduce_zombie(&mut self, slot: SlotRef, immediate: bool) -> Result<(), Preempted> {
        let Cap::Zombie {
            object,
            kind,
            number,
        } = self.objects.cte(slot).cap
        else {
            panic!("reducing non-Zombie in {slot}");
        };

        if immediate {
            let end_slot = SlotRef::new(object, (number - 1) as u32);
            self.cte_delete(end_slot, false)?;

            match self.objects.cte(slot).cap {
                Cap::Null => {}
                Cap::Zombie {
                    object: object2,
                    kind: kind2,
                    number: number2,
                } => {
                    if object2 == object && number2 == number && kind2 == kind {
                        assert!(
                            self.objects.cte(end_slot).is_empty(),
                            "Zombie end slot {end_slot} survived deletion"
                        );
                        self.objects.cte_mut(slot).cap = Cap::Zombie {
                            object,
                            kind,
                            number: number - 1,
                        };
                    } else {
                        assert!(
                            zombie_slot(object2) == slot && zombie_slot(object) != slot,
                            "unexpected Zombie in {slot}"
                        );
                    }
                }
                other => panic!("expected Zombie in {slot}, found {other}"),
            }
        } else {
            let target = zombie_slot(object);
            assert!(target != slot, "cyclic Zombie reduced in place");
            if let Cap::Zombie { object: inner, .. } = self.objects.cte(target).cap {
                assert!(zombie_slot(inner) != target, "nested cyclic Zombie");
            }
            self.cap_swap_for_delete(target, slot);
        }
        Ok(())
    }

    fn cap_swap_for_delete(&mut self, slot1: SlotRef, slot2: SlotRef) {
        if slot1 == slot2 {
            return;
        }
        let cap1 = self.objects.cte(slot1).cap;
        let cap2 = self.objects.cte(slot2).cap;
        self.objects.cte_swap(cap1, slot1, cap2, slot2);
    }

    /// Tear down what `cap` refers to, if it is the last capability to it.
    pub fn finalise_cap(&mut self, cap: Cap, is_final: bool, exposed: bool) -> Finalised {
        match cap {
            Cap::Endpoint { object, .. } => {
                if is_final {
                    self.cancel_all_ipc(object);
                }
                return Finalised::NULL;
            }
            Cap::Notification { object, .. } => {
                if is_final {
                    self.unbind_maybe_notification(object);
                    self.cancel_all_signals(object);
                }
                return Finalised::NULL;
            }
            Cap::Reply { .. } | Cap::Null | Cap::Domain => return Finalised::NULL,
            Cap::Frame {
                base,
                mapping: Some(mapping),
                ..
            } => {
                self.machine.unmap_frame(mapping.vspace, mapping.vaddr, base);
                return Finalised::NULL;
            }
            Cap::PageTable {
                base,
                mapping: Some(mapping),
                ..
            } => {
                if is_final {
                    self.machine
                        .unmap_page_table(mapping.vspace, mapping.vaddr, base);
                }
                return Finalised::NULL;
            }
            Cap::Frame { .. } | Cap::PageTable { .. } => return Finalised::NULL,
            _ => {}
        }

        assert!(!exposed, "{cap} cannot be finalised immediately");

        match cap {
            Cap::CNode { object, radix, .. } if is_final => Finalised {
                remainder: Cap::Zombie {
                    object,
                    kind: ZombieKind::CNode { radix },
                    number: ZombieKind::CNode { radix }.slot_count(),
                },
                cleanup: Cap::Null,
            },
            Cap::Thread { tcb } if is_final => {
                self.unbind_notification(tcb);
                self.suspend(tcb);
                log::debug!("delete: thread {} destroyed", tcb);
                Finalised {
                    remainder: Cap::Zombie {
                        object: tcb,
                        kind: ZombieKind::Tcb,
                        number: ZombieKind::Tcb.slot_count(),
                    },
                    cleanup: Cap::Null,
                }
            }
            Cap::Zombie { .. } => Finalised {
                remainder: cap,
                cleanup: Cap::Null,
            },
            Cap::IrqHandler { irq } if is_final => {
                self.deleting_irq_handler(irq);
                Finalised {
                    remainder: Cap::Null,
                    cleanup: cap,
                }
            }
            _ => Finalised::NULL,
        }
    }

    /// Delete a capability that is known not to need Zombie reduction,
    /// such as a one-shot reply cap or an IRQ notification.
    pub fn cte_delete_one(&mut self, slot: SlotRef) {
        if self.objects.cte(slot).is_empty() {
            return;
        }
        let is_final = self.objects.is_final_capability(slot);
        let cap = self.objects.cte(slot).cap;
        let finalised = self.finalise_cap(cap, is_final, true);
        assert!(
            cap_removable(finalised.remainder, slot) && finalised.cleanup.is_null(),
            "{cap} in {slot} needs more than one deletion step"
        );
        self.empty_slot(slot, Cap::Null);
    }

    /// Unlink `slot` from the derivation tree and clear it.
    pub fn empty_slot(&mut self, slot: SlotRef, cleanup: Cap) {
        if self.objects.cte(slot).is_empty() {
            return;
        }
        log::debug!("delete: empty {} ({})", slot, self.objects.cte(slot).cap);
        self.objects.cte_unlink(slot);
        self.post_cap_deletion(cleanup);
    }

    fn post_cap_deletion(&mut self, cleanup: Cap) {
        if let Cap::IrqHandler { irq } = cleanup {
            self.set_irq_state(irq, IrqState::Inactive);
        }
    }

    /// Delete every capability derived from the one in `slot`.
    pub fn cte_revoke(&mut self, slot: SlotRef) -> Result<(), Preempted> {
        while let Some(next) = self.objects.cte(slot).mdb.next {
            if !self.objects.is_mdb_parent_of(slot, next) {
                break;
            }
            self.cte_delete(next, true)?;
            self.preemption_point()?;
        }
        Ok(())
    }

    /// Whether deleting the capability in `slot` could take more than one
    /// step.
    pub fn slot_cap_long_running_delete(&self, slot: SlotRef) -> bool {
        let cte = self.objects.cte(slot);
        if cte.is_empty() || !self.objects.is_final_capability(slot) {
            return false;
        }
        matches!(
            cte.cap,
            Cap::Thread { .. } | Cap::Zombie { .. } | Cap::CNode { .. }
        )
    }
}
