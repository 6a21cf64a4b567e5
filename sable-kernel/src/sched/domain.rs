//! Scheduling domains
//!
//! Domains partition threads into groups scheduled by a fixed cyclic
//! table. Only threads of the current domain run; when its time budget is
//! spent the next table entry takes over, regardless of thread priorities.

use alloc::vec::Vec;

use crate::config::DomainScheduleEntry;

/// Position in the domain schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainState {
    schedule: Vec<DomainScheduleEntry>,
    index: usize,
    /// Domain now running.
    pub current: u8,
    /// Ticks left for the current domain.
    pub time_left: u64,
}

impl DomainState {
    /// Start at the first entry of `schedule`, which must be non-empty.
    pub fn new(schedule: &[DomainScheduleEntry]) -> Self {
        let first = schedule[0];
        Self {
            schedule: schedule.to_vec(),
            index: 0,
            current: first.domain,
            time_left: first.length,
        }
    }

    /// Move to the next schedule entry.
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.schedule.len();
        let entry = self.schedule[self.index];
        self.current = entry.domain;
        self.time_left = entry.length;
    }

    /// Whether more than one domain is configured.
    pub fn is_multi(&self) -> bool {
        self.schedule.iter().any(|e| e.domain != self.current)
    }
}
