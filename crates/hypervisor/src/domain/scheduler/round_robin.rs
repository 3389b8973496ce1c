//! Round-robin rotation over the runnable set

use super::VmScheduler;
use crate::domain::vm::VmId;

/// Rotation with a cursor pointing at the next VM to dispatch
///
/// A VM added mid-cycle lands at the tail of the current rotation, i.e. just
/// before the cursor, so every VM already waiting is dispatched first.
#[derive(Debug, Clone, Default)]
pub struct RoundRobinScheduler {
    rotation: Vec<VmId>,
    cursor: usize,
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, vm_id: &VmId) -> Option<usize> {
        self.rotation.iter().position(|id| id == vm_id)
    }
}

impl VmScheduler for RoundRobinScheduler {
    fn add(&mut self, vm_id: VmId, _priority: i64) {
        if self.position(&vm_id).is_some() {
            return;
        }
        if self.cursor == 0 {
            self.rotation.push(vm_id);
        } else {
            self.rotation.insert(self.cursor, vm_id);
            self.cursor += 1;
        }
    }

    fn remove(&mut self, vm_id: &VmId) -> bool {
        let Some(index) = self.position(vm_id) else {
            return false;
        };
        self.rotation.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.rotation.len() {
            self.cursor = 0;
        }
        true
    }

    fn contains(&self, vm_id: &VmId) -> bool {
        self.position(vm_id).is_some()
    }

    fn select(&mut self, width: usize) -> Vec<VmId> {
        let len = self.rotation.len();
        let take = width.min(len);
        if take == 0 {
            return Vec::new();
        }
        let selected = (0..take)
            .map(|offset| self.rotation[(self.cursor + offset) % len].clone())
            .collect();
        self.cursor = (self.cursor + take) % len;
        selected
    }

    fn order(&self) -> Vec<VmId> {
        let (head, tail) = self.rotation.split_at(self.cursor);
        tail.iter().chain(head).cloned().collect()
    }

    fn len(&self) -> usize {
        self.rotation.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use similar_asserts::assert_eq;

    use super::*;

    fn ids(names: &[&str]) -> Vec<VmId> {
        names.iter().map(|n| VmId::from(*n)).collect()
    }

    fn scheduler_with(names: &[&str]) -> RoundRobinScheduler {
        let mut scheduler = RoundRobinScheduler::new();
        for id in ids(names) {
            scheduler.add(id, 0);
        }
        scheduler
    }

    #[test]
    fn test_each_vm_selected_once_per_cycle() {
        let names = ["a", "b", "c", "d", "e"];
        let mut scheduler = scheduler_with(&names);

        let mut seen: BTreeMap<VmId, usize> = BTreeMap::new();
        for _ in 0..names.len() {
            let picked = scheduler.select(1);
            assert_eq!(picked.len(), 1);
            *seen.entry(picked[0].clone()).or_default() += 1;
        }
        assert_eq!(seen.len(), names.len());
        assert!(seen.values().all(|count| *count == 1));
    }

    #[test]
    fn test_selection_wraps() {
        let mut scheduler = scheduler_with(&["a", "b", "c"]);
        assert_eq!(scheduler.select(2), ids(&["a", "b"]));
        assert_eq!(scheduler.select(2), ids(&["c", "a"]));
        assert_eq!(scheduler.select(5), ids(&["b", "c", "a"]));
    }

    #[test]
    fn test_added_vm_joins_tail_of_rotation() {
        let mut scheduler = scheduler_with(&["a", "b", "c"]);
        assert_eq!(scheduler.select(1), ids(&["a"]));

        scheduler.add(VmId::from("d"), 0);
        assert_eq!(scheduler.order(), ids(&["b", "c", "a", "d"]));
        assert_eq!(scheduler.select(4), ids(&["b", "c", "a", "d"]));
    }

    #[test]
    fn test_remove_keeps_cursor_on_next_vm() {
        let mut scheduler = scheduler_with(&["a", "b", "c", "d"]);
        assert_eq!(scheduler.select(2), ids(&["a", "b"]));

        assert!(scheduler.remove(&VmId::from("a")));
        assert_eq!(scheduler.order(), ids(&["c", "d", "b"]));

        assert!(scheduler.remove(&VmId::from("d")));
        assert_eq!(scheduler.select(1), ids(&["c"]));
        assert_eq!(scheduler.select(1), ids(&["b"]));
        assert!(!scheduler.remove(&VmId::from("missing")));
    }

    #[test]
    fn test_removing_last_vm_resets_cursor() {
        let mut scheduler = scheduler_with(&["a", "b"]);
        assert_eq!(scheduler.select(1), ids(&["a"]));
        assert!(scheduler.remove(&VmId::from("b")));
        assert_eq!(scheduler.select(1), ids(&["a"]));
        assert!(scheduler.remove(&VmId::from("a")));
        assert!(scheduler.select(3).is_empty());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let scheduler = scheduler_with(&["a", "a", "b"]);
        assert_eq!(scheduler.len(), 2);
        assert!(scheduler.contains(&VmId::from("a")));
    }
}
