//! VM records and handles

use std::sync::Arc;

use api_types::{VmState, VmStatus};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::state::{next_state, VmEvent};
use crate::domain::chassis::ChassisProfile;
use crate::domain::error::{HypervisorError, Result};
use crate::domain::resources::{ResourceBag, ResourceGrant};

/// VM identifier, ordered lexicographically for deterministic tie breaking
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(String);

impl VmId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl From<&str> for VmId {
    fn from(id: &str) -> Self {
        VmId(id.to_string())
    }
}

impl From<String> for VmId {
    fn from(id: String) -> Self {
        VmId(id)
    }
}

/// Returned by VM creation; identifies one lifecycle of an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmHandle {
    pub vm_id: VmId,
    pub chassis: String,
    /// Generation at creation; distinguishes lifecycles of a reused id
    pub generation: u64,
    pub state: VmState,
}

/// Outcome of applying one event to a VM
///
/// A released grant travels with the transition and must be handed back to the
/// chassis ledger.
#[derive(Debug)]
#[must_use = "a released grant must be returned to the ledger"]
pub struct Transition {
    pub from: VmState,
    pub to: VmState,
    pub generation: u64,
    pub priority: i64,
    pub released: Option<ResourceGrant>,
}

#[derive(Debug)]
pub struct VirtualMachine {
    id: VmId,
    chassis: Arc<ChassisProfile>,
    state: VmState,
    priority: i64,
    generation: u64,
    epoch: u64,
    grant: Option<ResourceGrant>,
    created_at: DateTime<Utc>,
    failure_reason: Option<String>,
}

impl VirtualMachine {
    /// A freshly admitted VM in `CREATED`, holding `grant`.
    pub(crate) fn new(
        id: VmId,
        chassis: Arc<ChassisProfile>,
        grant: ResourceGrant,
        priority: i64,
        generation: u64,
    ) -> Self {
        Self {
            id,
            chassis,
            state: VmState::Created,
            priority,
            generation,
            epoch: generation,
            grant: Some(grant),
            created_at: Utc::now(),
            failure_reason: None,
        }
    }

    /// Rebuilds a record from persisted fields.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restored(
        id: VmId,
        chassis: Arc<ChassisProfile>,
        state: VmState,
        priority: i64,
        generation: u64,
        epoch: u64,
        grant: Option<ResourceGrant>,
        created_at: DateTime<Utc>,
        failure_reason: Option<String>,
    ) -> Self {
        Self {
            id,
            chassis,
            state,
            priority,
            generation,
            epoch,
            grant,
            created_at,
            failure_reason,
        }
    }

    /// Applies `event`, bumping the generation and taking the grant out when the
    /// event releases resources.
    pub(crate) fn apply(&mut self, event: VmEvent) -> Result<Transition> {
        if self.state.is_terminal() {
            return Err(HypervisorError::vm_not_found(&self.id));
        }
        let Some(to) = next_state(self.state, event) else {
            return Err(HypervisorError::InvalidStateTransition {
                vm_id: self.id.to_string(),
                current: self.state,
                attempted: event.target(),
            });
        };

        let released = if event.releases_grant() {
            self.grant.take()
        } else {
            None
        };
        let from = self.state;
        self.state = to;
        self.generation += 1;

        Ok(Transition {
            from,
            to,
            generation: self.generation,
            priority: self.priority,
            released,
        })
    }

    pub(crate) fn set_failure_reason(&mut self, reason: String) {
        self.failure_reason = Some(reason);
    }

    pub fn id(&self) -> &VmId {
        &self.id
    }

    pub fn chassis(&self) -> &Arc<ChassisProfile> {
        &self.chassis
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Generation this lifecycle started at
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Resources currently held; empty after release.
    pub fn resources_held(&self) -> ResourceBag {
        self.grant
            .as_ref()
            .map(|grant| grant.amounts().clone())
            .unwrap_or_default()
    }

    pub fn status(&self) -> VmStatus {
        VmStatus {
            vm_id: self.id.to_string(),
            chassis: self.chassis.name().to_string(),
            state: self.state,
            resources_held: self.resources_held().to_raw(),
            priority: self.priority,
            generation: self.generation,
        }
    }

    pub fn handle(&self) -> VmHandle {
        VmHandle {
            vm_id: self.id.clone(),
            chassis: self.chassis.name().to_string(),
            generation: self.epoch,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use api_types::ChassisRegistration;

    use super::*;
    use crate::domain::resources::{Amount, ResourceKind};

    fn vm() -> VirtualMachine {
        let profile = Arc::new(
            ChassisProfile::from_registration(
                &ChassisRegistration::new("small", 0.0).with_resource("energy", 100.0),
            )
            .unwrap(),
        );
        let grant = ResourceGrant::new(
            "small",
            ResourceBag::new().with(ResourceKind::Energy, Amount::from_units(50)),
        );
        VirtualMachine::new(VmId::from("a"), profile, grant, 3, 0)
    }

    #[test]
    fn test_every_transition_bumps_generation() {
        let mut vm = vm();
        for (event, expected) in [
            (VmEvent::Start, 1),
            (VmEvent::Pause, 2),
            (VmEvent::Resume, 3),
            (VmEvent::Stop, 4),
        ] {
            let transition = vm.apply(event).unwrap();
            assert_eq!(transition.generation, expected);
            assert_eq!(vm.generation(), expected);
            drop(transition.released);
        }
        assert_eq!(vm.epoch(), 0);
    }

    #[test]
    fn test_pause_keeps_grant_and_stop_takes_it() {
        let mut vm = vm();
        assert!(vm.apply(VmEvent::Start).unwrap().released.is_none());
        assert!(vm.apply(VmEvent::Pause).unwrap().released.is_none());
        assert_eq!(
            vm.resources_held().get(&ResourceKind::Energy),
            Amount::from_units(50)
        );

        let stopped = vm.apply(VmEvent::Stop).unwrap();
        let grant = stopped.released.expect("stop releases the grant");
        assert_eq!(grant.amounts().get(&ResourceKind::Energy), Amount::from_units(50));
        assert!(vm.resources_held().is_empty());

        let destroyed = vm.apply(VmEvent::Destroy).unwrap();
        assert!(destroyed.released.is_none());
    }

    #[test]
    fn test_illegal_transition_leaves_state_unchanged() {
        let mut vm = vm();
        let err = vm.apply(VmEvent::Resume).unwrap_err();
        assert_eq!(
            err,
            HypervisorError::InvalidStateTransition {
                vm_id: "a".to_string(),
                current: VmState::Created,
                attempted: VmState::Running,
            }
        );
        assert_eq!(vm.state(), VmState::Created);
        assert_eq!(vm.generation(), 0);
    }

    #[test]
    fn test_terminal_vm_reports_not_found() {
        let mut vm = vm();
        drop(vm.apply(VmEvent::Fault).unwrap().released);
        assert_eq!(
            vm.apply(VmEvent::Destroy).unwrap_err(),
            HypervisorError::vm_not_found("a")
        );
    }
}
