//! Ready Queue Implementation
//!
//! One FIFO of TCBs per `(domain, priority)`, linked through the TCBs'
//! `sched_next` and `sched_prev` fields. A two-level bitmap per domain
//! records which priorities have a non-empty queue: bit `g` of the top
//! level is set when any priority in group `g` (64 priorities) is ready,
//! and the second level has one bit per priority.

use alloc::boxed::Box;
use alloc::vec;

use sable_cap::TcbQueue;

use crate::config::NUM_PRIORITIES;

const WORD_BITS: usize = 64;
const L2_WORDS: usize = NUM_PRIORITIES / WORD_BITS;

/// Per-core ready queues for every domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadyQueues {
    queues: Box<[TcbQueue]>,
    l1: Box<[u64]>,
    l2: Box<[[u64; L2_WORDS]]>,
}

impl ReadyQueues {
    /// Create empty queues for `num_domains` domains.
    pub fn new(num_domains: usize) -> Self {
        Self {
            queues: vec![TcbQueue::EMPTY; num_domains * NUM_PRIORITIES].into_boxed_slice(),
            l1: vec![0; num_domains].into_boxed_slice(),
            l2: vec![[0; L2_WORDS]; num_domains].into_boxed_slice(),
        }
    }

    #[inline]
    const fn index(domain: u8, priority: u8) -> usize {
        domain as usize * NUM_PRIORITIES + priority as usize
    }

    /// Queue for `(domain, priority)`.
    #[inline]
    pub fn queue(&self, domain: u8, priority: u8) -> TcbQueue {
        self.queues[Self::index(domain, priority)]
    }

    /// Replace the queue for `(domain, priority)`, keeping the bitmap in
    /// step with its emptiness.
    pub fn set_queue(&mut self, domain: u8, priority: u8, queue: TcbQueue) {
        let was_empty = self.queues[Self::index(domain, priority)].is_empty();
        self.queues[Self::index(domain, priority)] = queue;
        let d = usize::from(domain);
        let group = usize::from(priority) / WORD_BITS;
        let bit = 1u64 << (usize::from(priority) % WORD_BITS);
        match (was_empty, queue.is_empty()) {
            (true, false) => {
                self.l2[d][group] |= bit;
                self.l1[d] |= 1 << group;
            }
            (false, true) => {
                self.l2[d][group] &= !bit;
                if self.l2[d][group] == 0 {
                    self.l1[d] &= !(1 << group);
                }
            }
            _ => {}
        }
    }

    /// Highest priority with a ready thread in `domain`.
    pub fn highest_priority(&self, domain: u8) -> Option<u8> {
        let d = usize::from(domain);
        if self.l1[d] == 0 {
            return None;
        }
        let group = (WORD_BITS - 1) - self.l1[d].leading_zeros() as usize;
        let low = (WORD_BITS - 1) - self.l2[d][group].leading_zeros() as usize;
        Some((group * WORD_BITS + low) as u8)
    }

    /// Whether `(domain, priority)` has its bitmap bit set.
    pub fn is_marked(&self, domain: u8, priority: u8) -> bool {
        let group = usize::from(priority) / WORD_BITS;
        self.l2[usize::from(domain)][group] & (1 << (usize::from(priority) % WORD_BITS)) != 0
    }

    /// Whether nothing is ready in `domain`.
    #[inline]
    pub fn is_empty(&self, domain: u8) -> bool {
        self.l1[usize::from(domain)] == 0
    }

    /// Number of domains covered.
    pub fn num_domains(&self) -> usize {
        self.l1.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sable_cap::ObjectRef;

    fn one(i: u32) -> TcbQueue {
        TcbQueue {
            head: ObjectRef::from_index(i),
            tail: ObjectRef::from_index(i),
        }
    }

    #[test]
    fn test_highest_priority() {
        let mut rq = ReadyQueues::new(2);
        assert_eq!(rq.highest_priority(0), None);
        rq.set_queue(0, 3, one(1));
        rq.set_queue(0, 200, one(2));
        rq.set_queue(1, 255, one(3));
        assert_eq!(rq.highest_priority(0), Some(200));
        assert_eq!(rq.highest_priority(1), Some(255));
        rq.set_queue(0, 200, TcbQueue::EMPTY);
        assert_eq!(rq.highest_priority(0), Some(3));
        rq.set_queue(0, 3, TcbQueue::EMPTY);
        assert!(rq.is_empty(0));
    }

    proptest! {
        #[test]
        fn bitmap_tracks_non_empty_queues(
            ops in proptest::collection::vec((any::<u8>(), any::<bool>()), 1..200)
        ) {
            let mut rq = ReadyQueues::new(1);
            let mut model = [false; NUM_PRIORITIES];
            for (prio, fill) in ops {
                rq.set_queue(0, prio, if fill { one(1) } else { TcbQueue::EMPTY });
                model[usize::from(prio)] = fill;
            }
            for prio in 0..NUM_PRIORITIES {
                prop_assert_eq!(rq.is_marked(0, prio as u8), model[prio]);
            }
            let expected = (0..NUM_PRIORITIES).rev().find(|&p| model[p]).map(|p| p as u8);
            prop_assert_eq!(rq.highest_priority(0), expected);
        }
    }
}
