//! Strict priority ordering
//!
//! Higher priority first, ties broken by ascending VM id. There is no aging, so
//! a low-priority VM can starve while higher-priority ones stay runnable.

use std::cmp::Reverse;

use priority_queue::PriorityQueue;

use super::VmScheduler;
use crate::domain::vm::VmId;

type Rank = (i64, Reverse<VmId>);

#[derive(Debug, Clone, Default)]
pub struct PriorityScheduler {
    queue: PriorityQueue<VmId, Rank>,
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VmScheduler for PriorityScheduler {
    fn add(&mut self, vm_id: VmId, priority: i64) {
        if self.queue.get(&vm_id).is_some() {
            return;
        }
        let rank = (priority, Reverse(vm_id.clone()));
        self.queue.push(vm_id, rank);
    }

    fn remove(&mut self, vm_id: &VmId) -> bool {
        self.queue.remove(vm_id).is_some()
    }

    fn contains(&self, vm_id: &VmId) -> bool {
        self.queue.get(vm_id).is_some()
    }

    fn select(&mut self, width: usize) -> Vec<VmId> {
        self.queue
            .clone()
            .into_sorted_iter()
            .take(width)
            .map(|(id, _)| id)
            .collect()
    }

    fn order(&self) -> Vec<VmId> {
        self.queue
            .clone()
            .into_sorted_iter()
            .map(|(id, _)| id)
            .collect()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}
