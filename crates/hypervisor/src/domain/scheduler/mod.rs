//! Dispatch ordering over runnable VMs
//!
//! A scheduler only orders VMs; it never touches the ledger. The orchestrator
//! feeds it VMs as they enter and leave `RUNNING` and asks it for the active
//! set of each dispatch tick.

use clap::ValueEnum;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::vm::VmId;

pub mod priority;
pub mod round_robin;

pub use priority::PriorityScheduler;
pub use round_robin::RoundRobinScheduler;

/// Per-deployment scheduling policy
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingPolicy {
    #[default]
    #[display("round-robin")]
    RoundRobin,
    /// Descending priority, ties by ascending VM id; no aging
    #[display("priority")]
    Priority,
}

/// Trait for VM dispatch schedulers
pub trait VmScheduler {
    /// Adds a VM that became runnable. Re-adding a known VM is a no-op.
    fn add(&mut self, vm_id: VmId, priority: i64);

    /// Removes a VM that stopped being runnable.
    fn remove(&mut self, vm_id: &VmId) -> bool;

    fn contains(&self, vm_id: &VmId) -> bool;

    /// Selects up to `width` VMs for the next tick, advancing any rotation.
    fn select(&mut self, width: usize) -> Vec<VmId>;

    /// Full dispatch order as of now, without advancing.
    fn order(&self) -> Vec<VmId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Concrete scheduler type chosen by [`SchedulingPolicy`]
#[derive(Debug, Clone)]
pub enum Scheduler {
    RoundRobin(RoundRobinScheduler),
    Priority(PriorityScheduler),
}

impl Scheduler {
    pub fn new(policy: SchedulingPolicy) -> Self {
        match policy {
            SchedulingPolicy::RoundRobin => Scheduler::RoundRobin(RoundRobinScheduler::new()),
            SchedulingPolicy::Priority => Scheduler::Priority(PriorityScheduler::new()),
        }
    }

    pub fn policy(&self) -> SchedulingPolicy {
        match self {
            Scheduler::RoundRobin(_) => SchedulingPolicy::RoundRobin,
            Scheduler::Priority(_) => SchedulingPolicy::Priority,
        }
    }
}

impl VmScheduler for Scheduler {
    fn add(&mut self, vm_id: VmId, priority: i64) {
        match self {
            Scheduler::RoundRobin(s) => s.add(vm_id, priority),
            Scheduler::Priority(s) => s.add(vm_id, priority),
        }
    }

    fn remove(&mut self, vm_id: &VmId) -> bool {
        match self {
            Scheduler::RoundRobin(s) => s.remove(vm_id),
            Scheduler::Priority(s) => s.remove(vm_id),
        }
    }

    fn contains(&self, vm_id: &VmId) -> bool {
        match self {
            Scheduler::RoundRobin(s) => s.contains(vm_id),
            Scheduler::Priority(s) => s.contains(vm_id),
        }
    }

    fn select(&mut self, width: usize) -> Vec<VmId> {
        match self {
            Scheduler::RoundRobin(s) => s.select(width),
            Scheduler::Priority(s) => s.select(width),
        }
    }

    fn order(&self) -> Vec<VmId> {
        match self {
            Scheduler::RoundRobin(s) => s.order(),
            Scheduler::Priority(s) => s.order(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Scheduler::RoundRobin(s) => s.len(),
            Scheduler::Priority(s) => s.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_round_trips_through_names() {
        assert_eq!(SchedulingPolicy::RoundRobin.to_string(), "round-robin");
        assert_eq!(
            SchedulingPolicy::from_str("priority", true).unwrap(),
            SchedulingPolicy::Priority
        );
        let parsed: SchedulingPolicy = serde_json::from_str("\"round-robin\"").unwrap();
        assert_eq!(parsed, SchedulingPolicy::RoundRobin);
    }

    #[test]
    fn test_scheduler_reports_its_policy() {
        for policy in [SchedulingPolicy::RoundRobin, SchedulingPolicy::Priority] {
            let scheduler = Scheduler::new(policy);
            assert_eq!(scheduler.policy(), policy);
            assert!(scheduler.is_empty());
        }
    }
}
