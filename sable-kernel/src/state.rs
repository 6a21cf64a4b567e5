//! Kernel state
//!
//! One [`KernelState`] holds everything the kernel knows. It is created
//! once at boot and afterwards only mutated through the entry points, under
//! the big kernel lock.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use sable_cap::{Cte, IrqState, ObjectRef};

use crate::config::{ConfigError, KernelConfig};
use crate::machine::Machine;
use crate::object::{KernelObject, ObjectTable, Tcb};
use crate::sched::{DomainState, ReadyQueues};

/// Deferred scheduling decision, resolved once per kernel exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Keep running the current thread.
    ResumeCurrentThread,
    /// Pick the highest-priority ready thread.
    ChooseNewThread,
    /// Switch to this thread unless something better is ready.
    SwitchToThread(ObjectRef),
}

/// Per-core scheduler state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeState {
    pub ready_queues: ReadyQueues,
    pub cur_thread: ObjectRef,
    pub idle_thread: ObjectRef,
    pub action: SchedulerAction,
}

/// The whole kernel.
pub struct KernelState {
    pub(crate) config: KernelConfig,
    pub(crate) objects: ObjectTable,
    pub(crate) nodes: Box<[NodeState]>,
    /// Core executing the current kernel entry.
    pub(crate) current_node: usize,
    pub(crate) domain: DomainState,
    /// Kernel-owned CNode holding one notification slot per IRQ.
    pub(crate) irq_node: ObjectRef,
    pub(crate) irq_states: Box<[IrqState]>,
    /// Work done since the last interrupt poll.
    pub(crate) work_units: u64,
    pub(crate) machine: Box<dyn Machine>,
    /// Cores owed a reschedule IPI at kernel exit.
    pub(crate) ipi_mask: u64,
}

impl KernelState {
    /// Create the kernel state with idle threads and the IRQ node, but no
    /// user threads.
    pub fn new(config: KernelConfig, machine: Box<dyn Machine>) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut objects = ObjectTable::new(config.object_table_capacity);
        let irq_count = usize::from(config.max_irq) + 1;

        let irq_node = objects
            .insert(
                None,
                KernelObject::CNode(vec![Cte::EMPTY; irq_count].into_boxed_slice()),
            )
            .ok_or(ConfigError::ObjectTableCapacity)?;

        let mut nodes = Vec::with_capacity(config.num_nodes);
        for core in 0..config.num_nodes {
            let idle = objects
                .insert(None, KernelObject::Tcb(Box::new(Tcb::idle(core))))
                .ok_or(ConfigError::ObjectTableCapacity)?;
            nodes.push(NodeState {
                ready_queues: ReadyQueues::new(config.num_domains),
                cur_thread: idle,
                idle_thread: idle,
                action: SchedulerAction::ResumeCurrentThread,
            });
        }

        let domain = DomainState::new(&config.domain_schedule);
        log::debug!(
            "kernel: {} cores, {} domains, {} irqs",
            config.num_nodes,
            config.num_domains,
            irq_count
        );
        Ok(Self {
            domain,
            objects,
            nodes: nodes.into_boxed_slice(),
            current_node: 0,
            irq_node,
            irq_states: vec![IrqState::Inactive; irq_count].into_boxed_slice(),
            work_units: 0,
            machine,
            ipi_mask: 0,
            config,
        })
    }

    /// Boot configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Object table.
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// Scheduler state of a core.
    pub fn node(&self, core: usize) -> &NodeState {
        &self.nodes[core]
    }

    /// Enter the kernel on `core`.
    pub fn set_current_node(&mut self, core: usize) {
        assert!(core < self.nodes.len(), "kernel entry on unknown core {core}");
        self.current_node = core;
    }

    /// Thread running on the current core.
    #[inline]
    pub fn cur_thread(&self) -> ObjectRef {
        self.nodes[self.current_node].cur_thread
    }

    #[inline]
    pub(crate) fn idle_thread(&self) -> ObjectRef {
        self.nodes[self.current_node].idle_thread
    }

    #[inline]
    pub(crate) fn action(&self) -> SchedulerAction {
        self.nodes[self.current_node].action
    }

    #[inline]
    pub(crate) fn set_action(&mut self, action: SchedulerAction) {
        self.nodes[self.current_node].action = action;
    }

    /// Domain currently scheduled.
    #[inline]
    pub fn cur_domain(&self) -> u8 {
        self.domain.current
    }

    /// Machine interface, for the trap layer.
    pub fn machine_mut(&mut self) -> &mut dyn Machine {
        self.machine.as_mut()
    }

    /// Current state of an IRQ line.
    pub fn irq_state(&self, irq: sable_cap::IrqNumber) -> Option<IrqState> {
        self.irq_states.get(irq.as_usize()).copied()
    }

    /// Thread control block, for the trap layer.
    pub fn tcb(&self, tcb: ObjectRef) -> &Tcb {
        self.objects.tcb(tcb)
    }

    /// Thread control block, for the trap layer to save registers into.
    pub fn tcb_mut(&mut self, tcb: ObjectRef) -> &mut Tcb {
        self.objects.tcb_mut(tcb)
    }
}
