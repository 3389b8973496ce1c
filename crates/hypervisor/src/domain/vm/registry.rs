//! Registry of VM records
//!
//! Terminal records are retained so that a reused id continues the generation
//! sequence of its previous lifecycle. Lookups treat them as absent.

use std::collections::BTreeMap;

use api_types::{VmState, VmStatus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::state::VmEvent;
use super::types::{Transition, VirtualMachine, VmHandle, VmId};
use crate::domain::error::{HypervisorError, Result};

#[derive(Debug, Default)]
pub struct VmRegistry {
    vms: DashMap<VmId, VirtualMachine>,
}

impl VmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self, vm_id: &VmId) -> bool {
        self.vms.get(vm_id).is_some_and(|vm| vm.is_live())
    }

    /// Generation the next lifecycle of `vm_id` starts at.
    ///
    /// Fails if the id is currently live.
    pub fn next_generation(&self, vm_id: &VmId) -> Result<u64> {
        match self.vms.get(vm_id) {
            Some(vm) if vm.is_live() => Err(HypervisorError::DuplicateVm {
                vm_id: vm_id.to_string(),
            }),
            Some(retired) => Ok(retired.generation() + 1),
            None => Ok(0),
        }
    }

    /// Inserts a new lifecycle, replacing a retired record of the same id.
    ///
    /// On a live collision the record is handed back so its grant can be
    /// returned to the ledger.
    pub fn insert(
        &self,
        vm: VirtualMachine,
    ) -> std::result::Result<VmHandle, (HypervisorError, VirtualMachine)> {
        match self.vms.entry(vm.id().clone()) {
            Entry::Occupied(occupied) if occupied.get().is_live() => Err((
                HypervisorError::DuplicateVm {
                    vm_id: vm.id().to_string(),
                },
                vm,
            )),
            Entry::Occupied(mut occupied) => {
                let handle = vm.handle();
                occupied.insert(vm);
                Ok(handle)
            }
            Entry::Vacant(vacant) => {
                let handle = vm.handle();
                vacant.insert(vm);
                Ok(handle)
            }
        }
    }

    /// Chassis of a live VM.
    pub fn chassis_of(&self, vm_id: &VmId) -> Result<String> {
        self.vms
            .get(vm_id)
            .filter(|vm| vm.is_live())
            .map(|vm| vm.chassis().name().to_string())
            .ok_or_else(|| HypervisorError::vm_not_found(vm_id))
    }

    /// Applies `event` to a live VM, recording `failure_reason` on success.
    pub fn apply(
        &self,
        vm_id: &VmId,
        event: VmEvent,
        failure_reason: Option<String>,
    ) -> Result<Transition> {
        let mut vm = self
            .vms
            .get_mut(vm_id)
            .ok_or_else(|| HypervisorError::vm_not_found(vm_id))?;
        let transition = vm.apply(event)?;
        if let Some(reason) = failure_reason {
            vm.set_failure_reason(reason);
        }
        Ok(transition)
    }

    pub fn status(&self, vm_id: &VmId) -> Result<VmStatus> {
        self.vms
            .get(vm_id)
            .filter(|vm| vm.is_live())
            .map(|vm| vm.status())
            .ok_or_else(|| HypervisorError::vm_not_found(vm_id))
    }

    /// Whether `handle` still names the live lifecycle it was issued for.
    pub fn is_current(&self, handle: &VmHandle) -> bool {
        self.vms
            .get(&handle.vm_id)
            .is_some_and(|vm| vm.is_live() && vm.epoch() == handle.generation)
    }

    /// Number of live VMs per state on `chassis`, with every state present.
    ///
    /// Retired records are left out: a reused id may replace them at any time,
    /// so terminal tallies are kept by the owning chassis instead.
    pub fn count_by_state(&self, chassis: &str) -> BTreeMap<VmState, usize> {
        let mut counts: BTreeMap<VmState, usize> =
            VmState::ALL.iter().map(|state| (*state, 0)).collect();
        for vm in self
            .vms
            .iter()
            .filter(|vm| vm.is_live() && vm.chassis().name() == chassis)
        {
            *counts.entry(vm.state()).or_default() += 1;
        }
        counts
    }

    /// Statuses of live VMs on `chassis`, sorted by id.
    pub fn list(&self, chassis: &str) -> Vec<VmStatus> {
        let mut statuses: Vec<VmStatus> = self
            .vms
            .iter()
            .filter(|vm| vm.is_live() && vm.chassis().name() == chassis)
            .map(|vm| vm.status())
            .collect();
        statuses.sort_by(|a, b| a.vm_id.cmp(&b.vm_id));
        statuses
    }

    /// Runs `f` over every record, in id order.
    pub fn for_each_sorted<F>(&self, mut f: F)
    where
        F: FnMut(&VirtualMachine),
    {
        let mut ids: Vec<VmId> = self.vms.iter().map(|vm| vm.key().clone()).collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(vm) = self.vms.get(&id) {
                f(&vm);
            }
        }
    }

    pub fn live_count(&self) -> usize {
        self.vms.iter().filter(|vm| vm.is_live()).count()
    }

    /// Total records, retained terminal records included.
    pub fn len(&self) -> usize {
        self.vms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vms.is_empty()
    }
}
