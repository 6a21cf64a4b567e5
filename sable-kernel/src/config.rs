//! Kernel configuration
//!
//! Consumed once at boot. Compile-time ABI constants (message registers,
//! object sizes, IPC buffer layout) live in `sable-syscall` and
//! `sable-cap` instead.

use alloc::vec;
use alloc::vec::Vec;

/// Number of thread priorities.
pub const NUM_PRIORITIES: usize = 256;

/// Most scheduling domains supported.
pub const MAX_DOMAINS: usize = 16;

/// One entry of the cyclic domain schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DomainScheduleEntry {
    /// Domain to run.
    pub domain: u8,
    /// Timer ticks the domain runs for.
    pub length: u64,
}

/// Boot-time kernel configuration.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Number of scheduling domains (1..=16).
    pub num_domains: usize,
    /// Cyclic domain schedule; must be non-empty.
    pub domain_schedule: Vec<DomainScheduleEntry>,
    /// Number of priorities; always [`NUM_PRIORITIES`].
    pub num_priorities: usize,
    /// Timer ticks per thread time slice.
    pub time_slice: u64,
    /// Work units between polls for pending interrupts.
    pub max_work_units_per_preemption: u64,
    /// log2 size of the chunks an untyped reset clears between polls.
    pub reset_chunk_bits: u8,
    /// Most objects one retype may create.
    pub retype_fan_out_limit: u64,
    /// Highest interrupt number.
    pub max_irq: u16,
    /// Number of cores.
    pub num_nodes: usize,
    /// Capacity of the kernel object table.
    pub object_table_capacity: usize,
    /// Radix of the root thread's CNode.
    pub root_cnode_bits: u8,
    /// Largest radix a retyped CNode may have.
    pub max_cnode_radix: u8,
    /// Take the IPC fast path for eligible Call and ReplyRecv.
    pub fastpath: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            num_domains: 1,
            domain_schedule: vec![DomainScheduleEntry {
                domain: 0,
                length: 1,
            }],
            num_priorities: NUM_PRIORITIES,
            time_slice: 5,
            max_work_units_per_preemption: 100,
            reset_chunk_bits: 8,
            retype_fan_out_limit: 256,
            max_irq: 255,
            num_nodes: 1,
            object_table_capacity: 4096,
            root_cnode_bits: 12,
            max_cnode_radix: 20,
            fastpath: true,
        }
    }
}

/// Reasons a configuration is rejected at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `num_domains` outside 1..=16.
    DomainCount,
    /// Empty schedule, or an entry naming a missing domain or of zero length.
    DomainSchedule,
    /// `num_priorities` is not 256.
    Priorities,
    /// No cores, or more than fit in an IPI mask.
    NodeCount,
    /// `root_cnode_bits` outside 1..=30 (or not enough for the well-known slots).
    RootCNodeBits,
    /// A zero time slice, work-unit budget, fan-out limit or CNode radix.
    ZeroLimit,
    /// Object table too small for the kernel's own objects.
    ObjectTableCapacity,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Self::DomainCount => "num_domains must be 1..=16",
            Self::DomainSchedule => "invalid domain schedule",
            Self::Priorities => "num_priorities must be 256",
            Self::NodeCount => "num_nodes must be 1..=64",
            Self::RootCNodeBits => "root_cnode_bits out of range",
            Self::ZeroLimit => "limits must be non-zero",
            Self::ObjectTableCapacity => "object_table_capacity too small",
        };
        f.write_str(msg)
    }
}

impl KernelConfig {
    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_domains == 0 || self.num_domains > MAX_DOMAINS {
            return Err(ConfigError::DomainCount);
        }
        if self.domain_schedule.is_empty()
            || self
                .domain_schedule
                .iter()
                .any(|e| usize::from(e.domain) >= self.num_domains || e.length == 0)
        {
            return Err(ConfigError::DomainSchedule);
        }
        if self.num_priorities != NUM_PRIORITIES {
            return Err(ConfigError::Priorities);
        }
        if self.num_nodes == 0 || self.num_nodes > 64 {
            return Err(ConfigError::NodeCount);
        }
        if self.root_cnode_bits < 4 || self.root_cnode_bits > 30 {
            return Err(ConfigError::RootCNodeBits);
        }
        if self.time_slice == 0
            || self.max_work_units_per_preemption == 0
            || self.retype_fan_out_limit == 0
            || self.max_cnode_radix == 0
        {
            return Err(ConfigError::ZeroLimit);
        }
        // NULL, the IRQ node, one idle thread per core, the root CNode and
        // the root thread.
        if self.object_table_capacity < self.num_nodes + 4 {
            return Err(ConfigError::ObjectTableCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(KernelConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_schedule_must_name_existing_domains() {
        let config = KernelConfig {
            num_domains: 2,
            domain_schedule: vec![DomainScheduleEntry {
                domain: 2,
                length: 10,
            }],
            ..KernelConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::DomainSchedule));
    }
}
