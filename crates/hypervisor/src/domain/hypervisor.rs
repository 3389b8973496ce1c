//! The orchestrator tying chassis, ledgers, VM records and schedulers together
//!
//! Every chassis is its own consistency boundary: its ledger, its scheduler and
//! every write to the VM records placed on it happen under one partition lock,
//! so operations on different chassis never contend. Mutating calls on one VM
//! id are additionally serialized by a per-id lock, which orders them by issue.
//! Lock order is always id lock, then partition lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use api_types::{
    ChassisRegistration, CreateVmRequest, ResourceUsage, SystemResources, VmState, VmStatus,
};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chassis::{ChassisProfile, ChassisRegistry, HealthProbe};
use super::error::{HypervisorError, Result};
use super::ledger::Ledger;
use super::resources::{ResourceBag, ResourceGrant};
use super::scheduler::{Scheduler, SchedulingPolicy, VmScheduler};
use super::snapshot::{ChassisRecord, HypervisorSnapshot, VmRecord};
use super::vm::{Transition, VirtualMachine, VmEvent, VmHandle, VmId, VmRegistry};
use crate::util::KeyedAsyncLock;

/// Outcome of the most recent dispatch tick of one chassis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchRound {
    pub tick: u64,
    pub active: Vec<VmId>,
    /// Runnable VMs at the time of the tick
    pub runnable: usize,
}

#[derive(Debug)]
struct ChassisPartition {
    profile: Arc<ChassisProfile>,
    ledger: Ledger,
    scheduler: Scheduler,
    round: DispatchRound,
    /// Lifecycles that ended here, per terminal state
    retired: BTreeMap<VmState, usize>,
}

impl ChassisPartition {
    fn new(profile: Arc<ChassisProfile>, policy: SchedulingPolicy) -> Self {
        Self {
            ledger: Ledger::new(&profile),
            scheduler: Scheduler::new(policy),
            round: DispatchRound::default(),
            retired: BTreeMap::new(),
            profile,
        }
    }

    /// Applies the side effects of a committed transition: returns the released
    /// grant to the ledger and moves the VM in or out of the runnable set.
    fn settle(&mut self, vm_id: &VmId, transition: Transition) -> ResourceBag {
        let released = transition
            .released
            .map(|grant| self.ledger.release(grant))
            .unwrap_or_default();

        if transition.to.is_terminal() {
            *self.retired.entry(transition.to).or_default() += 1;
        }
        if transition.to.is_runnable() {
            self.scheduler.add(vm_id.clone(), transition.priority);
        } else {
            self.scheduler.remove(vm_id);
            self.round.active.retain(|id| id != vm_id);
        }
        released
    }

    fn dispatch(&mut self) -> DispatchRound {
        let active = self.scheduler.select(self.profile.dispatch_width());
        self.round = DispatchRound {
            tick: self.round.tick + 1,
            active,
            runnable: self.scheduler.len(),
        };
        self.round.clone()
    }
}

/// Explicit orchestrator context, shared as `Arc<Hypervisor>`
pub struct Hypervisor {
    policy: SchedulingPolicy,
    chassis: ChassisRegistry,
    partitions: DashMap<String, Arc<Mutex<ChassisPartition>>>,
    vms: VmRegistry,
    vm_locks: KeyedAsyncLock<VmId>,
}

impl std::fmt::Debug for Hypervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hypervisor")
            .field("policy", &self.policy)
            .field("chassis", &self.chassis.names())
            .field("vms", &self.vms.len())
            .finish()
    }
}

impl Hypervisor {
    pub fn new(policy: SchedulingPolicy) -> Self {
        Self::with_registry(policy, ChassisRegistry::new())
    }

    /// Orchestrator whose health checks consult `probe`.
    pub fn with_probe(policy: SchedulingPolicy, probe: Arc<dyn HealthProbe>) -> Self {
        Self::with_registry(policy, ChassisRegistry::with_probe(probe))
    }

    fn with_registry(policy: SchedulingPolicy, chassis: ChassisRegistry) -> Self {
        Self {
            policy,
            chassis,
            partitions: DashMap::new(),
            vms: VmRegistry::new(),
            vm_locks: KeyedAsyncLock::new(),
        }
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    fn partition(&self, name: &str) -> Result<Arc<Mutex<ChassisPartition>>> {
        self.partitions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HypervisorError::UnknownChassis {
                name: name.to_string(),
            })
    }

    /// Registers a chassis; overhead is subtracted from its capacities here, once.
    pub fn register_chassis(
        &self,
        registration: &ChassisRegistration,
    ) -> Result<Arc<ChassisProfile>> {
        let profile = ChassisProfile::from_registration(registration)?;
        let profile = self.chassis.register(
            profile,
            registration.healthy,
            registration.unhealthy_reason.clone(),
        )?;
        self.partitions.insert(
            profile.name().to_string(),
            Arc::new(Mutex::new(ChassisPartition::new(
                Arc::clone(&profile),
                self.policy,
            ))),
        );
        Ok(profile)
    }

    pub fn capabilities(&self, name: &str) -> Result<Arc<ChassisProfile>> {
        self.chassis.capabilities(name)
    }

    /// Registered chassis names, sorted.
    pub fn list_chassis(&self) -> Vec<String> {
        self.chassis.names()
    }

    /// Probes the chassis; a failure blocks new VMs but leaves existing ones alone.
    pub async fn health_check(&self, name: &str) -> Result<()> {
        self.chassis.health_check(name).await
    }

    pub fn set_chassis_health(&self, name: &str, healthy: bool, reason: Option<String>) -> Result<()> {
        self.chassis.set_health(name, healthy, reason)
    }

    /// Admits a VM in `CREATED`, holding the requested grant.
    ///
    /// Fails fast when the chassis cannot cover the request; nothing is queued.
    pub async fn create_vm(&self, request: &CreateVmRequest) -> Result<VmHandle> {
        let vm_id = VmId::from(request.vm_id.as_str());
        if !vm_id.is_valid() {
            return Err(HypervisorError::invalid_request("VM id must not be empty"));
        }
        let _id_guard = self.vm_locks.lock(&vm_id).await;

        let profile = self.chassis.capabilities(&request.chassis)?;
        let generation = self.vms.next_generation(&vm_id)?;
        self.chassis.ensure_healthy(profile.name())?;
        let requested = ResourceBag::from_raw(&request.resources)?;
        profile.validate_request(&requested)?;

        let partition = self.partition(profile.name())?;
        let mut partition = partition.lock().await;
        let grant = match partition.ledger.allocate(&requested) {
            Ok(grant) => grant,
            Err(err) => {
                warn!(
                    vm_id = %vm_id,
                    chassis = %profile.name(),
                    error = %err,
                    "VM admission refused"
                );
                return Err(err);
            }
        };

        let vm = VirtualMachine::new(
            vm_id.clone(),
            Arc::clone(&profile),
            grant,
            request.priority,
            generation,
        );
        match self.vms.insert(vm) {
            Ok(handle) => {
                info!(
                    vm_id = %vm_id,
                    chassis = %profile.name(),
                    priority = request.priority,
                    generation = generation,
                    "VM created"
                );
                Ok(handle)
            }
            Err((err, rejected)) => {
                if let Some(grant) = Self::reclaim(rejected) {
                    partition.ledger.release(grant);
                }
                Err(err)
            }
        }
    }

    fn reclaim(vm: VirtualMachine) -> Option<ResourceGrant> {
        let mut vm = vm;
        vm.apply(VmEvent::Destroy).ok().and_then(|t| t.released)
    }

    pub async fn start_vm(&self, vm_id: &str) -> Result<VmState> {
        self.transition(vm_id, VmEvent::Start, None).await
    }

    /// Suspends dispatch; the grant stays held.
    pub async fn pause_vm(&self, vm_id: &str) -> Result<VmState> {
        self.transition(vm_id, VmEvent::Pause, None).await
    }

    pub async fn resume_vm(&self, vm_id: &str) -> Result<VmState> {
        self.transition(vm_id, VmEvent::Resume, None).await
    }

    pub async fn stop_vm(&self, vm_id: &str) -> Result<VmState> {
        self.transition(vm_id, VmEvent::Stop, None).await
    }

    /// Destroys the VM from any non-terminal state, releasing its grant if held.
    ///
    /// This is the only way to cancel a VM and takes effect immediately.
    pub async fn destroy_vm(&self, vm_id: &str) -> Result<VmState> {
        self.transition(vm_id, VmEvent::Destroy, None).await
    }

    /// Reports an unrecoverable fault; the VM moves to `FAILED` and its grant is released.
    pub async fn fail_vm(&self, vm_id: &str, reason: impl Into<String>) -> Result<VmState> {
        self.transition(vm_id, VmEvent::Fault, Some(reason.into()))
            .await
    }

    async fn transition(
        &self,
        vm_id: &str,
        event: VmEvent,
        failure_reason: Option<String>,
    ) -> Result<VmState> {
        let vm_id = VmId::from(vm_id);
        let _id_guard = self.vm_locks.lock(&vm_id).await;

        let chassis = self.vms.chassis_of(&vm_id)?;
        let partition = self.partition(&chassis)?;
        let mut partition = partition.lock().await;

        let transition = match self.vms.apply(&vm_id, event, failure_reason) {
            Ok(transition) => transition,
            Err(err) => {
                debug!(vm_id = %vm_id, event = %event, error = %err, "VM transition rejected");
                return Err(err);
            }
        };
        let (from, to, generation) = (transition.from, transition.to, transition.generation);
        let released = partition.settle(&vm_id, transition);

        if to == VmState::Failed {
            warn!(
                vm_id = %vm_id,
                chassis = %chassis,
                from = %from,
                generation = generation,
                "VM failed"
            );
        } else {
            info!(
                vm_id = %vm_id,
                chassis = %chassis,
                from = %from,
                to = %to,
                generation = generation,
                released_kinds = released.len(),
                "VM transitioned"
            );
        }
        Ok(to)
    }

    /// Current status of a live VM.
    pub fn status(&self, vm_id: &str) -> Result<VmStatus> {
        self.vms.status(&VmId::from(vm_id))
    }

    /// Whether `handle` still refers to the live lifecycle of its id.
    pub fn is_current(&self, handle: &VmHandle) -> bool {
        self.vms.is_current(handle)
    }

    /// Live VMs on `chassis`, sorted by id.
    pub async fn list_vms(&self, chassis: &str) -> Result<Vec<VmStatus>> {
        let partition = self.partition(chassis)?;
        let _partition = partition.lock().await;
        Ok(self.vms.list(chassis))
    }

    /// Ledger usage and VM counts of one chassis, taken atomically.
    pub async fn system_resources(&self, chassis: &str) -> Result<SystemResources> {
        let partition = self.partition(chassis)?;
        let partition = partition.lock().await;
        let healthy = self.chassis.health(chassis)?.healthy;

        let resources = partition
            .ledger
            .usage()
            .iter()
            .map(|(kind, line)| {
                (
                    kind.to_string(),
                    ResourceUsage {
                        allocated: line.allocated.as_f64(),
                        capacity: line.capacity.as_f64(),
                    },
                )
            })
            .collect();

        let mut vm_counts = self.vms.count_by_state(chassis);
        for (state, count) in &partition.retired {
            *vm_counts.entry(*state).or_default() += count;
        }

        Ok(SystemResources {
            chassis: chassis.to_string(),
            healthy,
            resources,
            vm_counts,
        })
    }

    /// Advisory headroom; a later `create_vm` may still fail.
    pub async fn query_available(&self, chassis: &str) -> Result<ResourceBag> {
        let partition = self.partition(chassis)?;
        let partition = partition.lock().await;
        Ok(partition.ledger.query_available())
    }

    /// Runs one dispatch tick on `chassis`, selecting up to its slot count.
    pub async fn dispatch_tick(&self, chassis: &str) -> Result<DispatchRound> {
        let partition = self.partition(chassis)?;
        let mut partition = partition.lock().await;
        let round = partition.dispatch();
        debug!(
            chassis = %chassis,
            tick = round.tick,
            active = round.active.len(),
            runnable = round.runnable,
            "Dispatch tick"
        );
        Ok(round)
    }

    /// Runs one dispatch tick on every chassis.
    pub async fn dispatch_all(&self) -> BTreeMap<String, DispatchRound> {
        let mut rounds = BTreeMap::new();
        for name in self.chassis.names() {
            if let Ok(round) = self.dispatch_tick(&name).await {
                rounds.insert(name, round);
            }
        }
        rounds
    }

    /// Active set chosen by the most recent tick on `chassis`.
    pub async fn active_set(&self, chassis: &str) -> Result<DispatchRound> {
        let partition = self.partition(chassis)?;
        let partition = partition.lock().await;
        Ok(partition.round.clone())
    }

    /// Dispatch order the next tick would start from.
    pub async fn runnable_order(&self, chassis: &str) -> Result<Vec<VmId>> {
        let partition = self.partition(chassis)?;
        let partition = partition.lock().await;
        Ok(partition.scheduler.order())
    }

    /// Ticks every chassis each `interval` until `cancellation_token` fires.
    pub async fn run(&self, interval: Duration, cancellation_token: CancellationToken) {
        self.run_ticks(interval, None, cancellation_token).await;
    }

    /// Like [`run`](Self::run), stopping after `max_ticks` rounds if given.
    ///
    /// Returns the number of rounds executed.
    pub async fn run_ticks(
        &self,
        interval: Duration,
        max_ticks: Option<u64>,
        cancellation_token: CancellationToken,
    ) -> u64 {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ticks = 0;

        loop {
            if max_ticks.is_some_and(|max| ticks >= max) {
                info!(ticks = ticks, "Dispatch tick limit reached");
                break;
            }
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Dispatch loop shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.dispatch_all().await;
                    ticks += 1;
                }
            }
        }
        ticks
    }

    /// Locks every partition in name order.
    async fn lock_all(&self) -> Vec<(String, OwnedMutexGuard<ChassisPartition>)> {
        let mut guards = Vec::new();
        for name in self.chassis.names() {
            if let Ok(partition) = self.partition(&name) {
                guards.push((name, partition.lock_owned().await));
            }
        }
        guards
    }

    /// Consistent copy of the whole orchestrator state.
    pub async fn snapshot(&self) -> HypervisorSnapshot {
        let guards = self.lock_all().await;

        let chassis = guards
            .iter()
            .map(|(name, partition)| {
                let (healthy, reason) = self
                    .chassis
                    .health(name)
                    .map(|health| (health.healthy, health.reason))
                    .unwrap_or((true, None));
                ChassisRecord {
                    registration: partition.profile.to_registration(healthy, reason),
                    dispatch_order: partition
                        .scheduler
                        .order()
                        .into_iter()
                        .map(|id| id.to_string())
                        .collect(),
                    retired: partition.retired.clone(),
                }
            })
            .collect();

        let mut vms = Vec::with_capacity(self.vms.len());
        self.vms.for_each_sorted(|vm| {
            vms.push(VmRecord {
                vm_id: vm.id().to_string(),
                chassis: vm.chassis().name().to_string(),
                state: vm.state(),
                priority: vm.priority(),
                generation: vm.generation(),
                epoch: vm.epoch(),
                resources_held: vm.resources_held().to_raw(),
                created_at: vm.created_at(),
                failure_reason: vm.failure_reason().map(str::to_string),
            });
        });
        drop(guards);

        HypervisorSnapshot {
            policy: self.policy,
            taken_at: Utc::now(),
            chassis,
            vms,
        }
    }

    /// Rebuilds an orchestrator from `snapshot`.
    ///
    /// Grants are re-allocated from fresh ledgers, so an inconsistent snapshot
    /// fails with `ResourceExhausted` instead of overcommitting a chassis.
    pub async fn restore(snapshot: &HypervisorSnapshot) -> Result<Self> {
        Self::new(snapshot.policy).load(snapshot).await
    }

    /// Like [`restore`](Self::restore), with health checks consulting `probe`.
    pub async fn restore_with_probe(
        snapshot: &HypervisorSnapshot,
        probe: Arc<dyn HealthProbe>,
    ) -> Result<Self> {
        Self::with_probe(snapshot.policy, probe).load(snapshot).await
    }

    async fn load(self, snapshot: &HypervisorSnapshot) -> Result<Self> {
        for record in &snapshot.chassis {
            self.register_chassis(&record.registration)?;
            let partition = self.partition(&record.registration.name)?;
            partition.lock().await.retired = record.retired.clone();
        }

        let mut records: Vec<&VmRecord> = snapshot.vms.iter().collect();
        records.sort_by(|a, b| a.vm_id.cmp(&b.vm_id));
        let mut runnable: BTreeMap<&str, Vec<&VmRecord>> = BTreeMap::new();

        for record in records {
            let vm_id = VmId::from(record.vm_id.as_str());
            let profile = self.chassis.capabilities(&record.chassis)?;
            let partition = self.partition(&record.chassis)?;
            let mut partition = partition.lock().await;

            let held = ResourceBag::from_raw(&record.resources_held)?;
            let grant = if record.state.is_terminal() {
                None
            } else {
                Some(partition.ledger.allocate(&held)?)
            };

            let vm = VirtualMachine::restored(
                vm_id,
                profile,
                record.state,
                record.priority,
                record.generation,
                record.epoch,
                grant,
                record.created_at,
                record.failure_reason.clone(),
            );
            if let Err((err, rejected)) = self.vms.insert(vm) {
                if let Some(grant) = Self::reclaim(rejected) {
                    partition.ledger.release(grant);
                }
                return Err(err);
            }
            if record.state.is_runnable() {
                runnable.entry(record.chassis.as_str()).or_default().push(record);
            }
        }

        // Runnable VMs rejoin in their saved dispatch order, unknown ones last by id.
        for chassis in &snapshot.chassis {
            let Some(mut pending) = runnable.remove(chassis.registration.name.as_str()) else {
                continue;
            };
            pending.sort_by_key(|record| {
                chassis
                    .dispatch_order
                    .iter()
                    .position(|id| *id == record.vm_id)
                    .unwrap_or(usize::MAX)
            });

            let partition = self.partition(&chassis.registration.name)?;
            let mut partition = partition.lock().await;
            for record in pending {
                partition
                    .scheduler
                    .add(VmId::from(record.vm_id.as_str()), record.priority);
            }
        }

        info!(
            chassis = snapshot.chassis.len(),
            vms = snapshot.vms.len(),
            live = self.vms.live_count(),
            "Hypervisor restored from snapshot"
        );
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::domain::resources::{Amount, ResourceKind};

    async fn small(policy: SchedulingPolicy) -> Hypervisor {
        let hypervisor = Hypervisor::new(policy);
        hypervisor
            .register_chassis(
                &ChassisRegistration::new("small", 0.0)
                    .with_resource("slots", 2.0)
                    .with_resource("energy", 100.0)
                    .with_resource("memory", 1024.0),
            )
            .unwrap();
        hypervisor
    }

    fn request(id: &str, slots: f64) -> CreateVmRequest {
        CreateVmRequest::new(id, "small")
            .with_resource("slots", slots)
            .with_resource("energy", 10.0)
    }

    #[tokio::test]
    async fn test_pause_keeps_vm_out_of_dispatch() {
        let hypervisor = small(SchedulingPolicy::RoundRobin).await;
        hypervisor.create_vm(&request("a", 1.0)).await.unwrap();
        hypervisor.create_vm(&request("b", 1.0)).await.unwrap();
        hypervisor.start_vm("a").await.unwrap();
        hypervisor.start_vm("b").await.unwrap();

        let round = hypervisor.dispatch_tick("small").await.unwrap();
        assert_eq!(round.active.len(), 2);

        hypervisor.pause_vm("a").await.unwrap();
        assert_eq!(
            hypervisor.active_set("small").await.unwrap().active,
            vec![VmId::from("b")]
        );
        let round = hypervisor.dispatch_tick("small").await.unwrap();
        assert_eq!(round.active, vec![VmId::from("b")]);
        assert_eq!(round.runnable, 1);
        assert_eq!(round.tick, 2);
    }

    #[tokio::test]
    async fn test_create_vm_validates_request() {
        let hypervisor = small(SchedulingPolicy::Priority).await;
        let bad_kind = CreateVmRequest::new("a", "small").with_resource("gpu", 1.0);
        assert!(matches!(
            hypervisor.create_vm(&bad_kind).await,
            Err(HypervisorError::InvalidRequest { .. })
        ));
        let fractional = CreateVmRequest::new("a", "small").with_resource("slots", 0.5);
        assert!(matches!(
            hypervisor.create_vm(&fractional).await,
            Err(HypervisorError::InvalidRequest { .. })
        ));
        assert!(matches!(
            hypervisor.create_vm(&CreateVmRequest::new(" ", "small")).await,
            Err(HypervisorError::InvalidRequest { .. })
        ));
        assert!(matches!(
            hypervisor
                .create_vm(&CreateVmRequest::new("a", "missing"))
                .await,
            Err(HypervisorError::UnknownChassis { .. })
        ));
    }

    #[tokio::test]
    async fn test_unhealthy_chassis_refuses_new_vms_only() {
        let hypervisor = small(SchedulingPolicy::RoundRobin).await;
        hypervisor.create_vm(&request("a", 1.0)).await.unwrap();
        hypervisor
            .set_chassis_health("small", false, Some("osmotic stress".to_string()))
            .unwrap();

        assert!(matches!(
            hypervisor.create_vm(&request("b", 1.0)).await,
            Err(HypervisorError::ChassisUnhealthy { .. })
        ));
        assert_eq!(hypervisor.start_vm("a").await.unwrap(), VmState::Running);
        assert!(!hypervisor.system_resources("small").await.unwrap().healthy);
    }

    #[tokio::test]
    async fn test_fail_vm_releases_grant() {
        let hypervisor = small(SchedulingPolicy::RoundRobin).await;
        hypervisor.create_vm(&request("a", 2.0)).await.unwrap();
        hypervisor.start_vm("a").await.unwrap();

        assert_eq!(
            hypervisor.fail_vm("a", "ribosome stall").await.unwrap(),
            VmState::Failed
        );
        let available = hypervisor.query_available("small").await.unwrap();
        assert_eq!(
            available.get(&ResourceKind::ExecutionSlots),
            Amount::from_units(2)
        );
        assert!(hypervisor.runnable_order("small").await.unwrap().is_empty());
        assert!(matches!(
            hypervisor.fail_vm("a", "again").await,
            Err(HypervisorError::VmNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_snapshot_restore_preserves_state() {
        let hypervisor = small(SchedulingPolicy::Priority).await;
        hypervisor
            .create_vm(&request("a", 1.0).with_priority(3))
            .await
            .unwrap();
        hypervisor.create_vm(&request("b", 1.0)).await.unwrap();
        hypervisor.start_vm("a").await.unwrap();
        hypervisor.destroy_vm("b").await.unwrap();

        let snapshot = hypervisor.snapshot().await;
        let restored = Hypervisor::restore(&snapshot).await.unwrap();

        assert_eq!(restored.policy(), SchedulingPolicy::Priority);
        assert_eq!(restored.status("a").unwrap(), hypervisor.status("a").unwrap());
        assert_eq!(
            restored.system_resources("small").await.unwrap(),
            hypervisor.system_resources("small").await.unwrap()
        );
        assert_eq!(
            restored.runnable_order("small").await.unwrap(),
            vec![VmId::from("a")]
        );

        let handle = restored.create_vm(&request("b", 1.0)).await.unwrap();
        assert_eq!(handle.generation, 2);
    }

    #[tokio::test]
    async fn test_retired_counts_stay_with_their_chassis() {
        let hypervisor = small(SchedulingPolicy::RoundRobin).await;
        hypervisor
            .register_chassis(&ChassisRegistration::new("large", 0.0).with_resource("slots", 8.0))
            .unwrap();

        hypervisor.create_vm(&request("a", 1.0)).await.unwrap();
        hypervisor.destroy_vm("a").await.unwrap();
        let before = hypervisor.system_resources("small").await.unwrap().vm_counts;
        assert_eq!(before[&VmState::Destroyed], 1);

        hypervisor
            .create_vm(&CreateVmRequest::new("a", "large").with_resource("slots", 1.0))
            .await
            .unwrap();
        let after = hypervisor.system_resources("small").await.unwrap().vm_counts;
        assert_eq!(after, before);

        let large = hypervisor.system_resources("large").await.unwrap().vm_counts;
        assert_eq!(large[&VmState::Created], 1);
        assert_eq!(large[&VmState::Destroyed], 0);
    }

    #[tokio::test]
    async fn test_restore_keeps_round_robin_rotation() {
        let hypervisor = Hypervisor::new(SchedulingPolicy::RoundRobin);
        hypervisor
            .register_chassis(&ChassisRegistration::new("one", 0.0).with_resource("slots", 1.0))
            .unwrap();
        for id in ["b", "c", "a"] {
            hypervisor
                .create_vm(&CreateVmRequest::new(id, "one"))
                .await
                .unwrap();
            hypervisor.start_vm(id).await.unwrap();
        }
        hypervisor.dispatch_tick("one").await.unwrap();

        let order = hypervisor.runnable_order("one").await.unwrap();
        assert_eq!(
            order,
            vec![VmId::from("c"), VmId::from("a"), VmId::from("b")]
        );

        let restored = Hypervisor::restore(&hypervisor.snapshot().await)
            .await
            .unwrap();
        assert_eq!(restored.runnable_order("one").await.unwrap(), order);
        assert_eq!(
            restored.dispatch_tick("one").await.unwrap().active,
            hypervisor.dispatch_tick("one").await.unwrap().active
        );
    }

    #[tokio::test]
    async fn test_restore_keeps_health_reason() {
        let hypervisor = small(SchedulingPolicy::RoundRobin).await;
        hypervisor
            .set_chassis_health("small", false, Some("osmotic stress".to_string()))
            .unwrap();

        let restored = Hypervisor::restore(&hypervisor.snapshot().await)
            .await
            .unwrap();
        assert_eq!(
            restored.create_vm(&request("a", 1.0)).await.unwrap_err(),
            HypervisorError::ChassisUnhealthy {
                name: "small".to_string(),
                reason: "osmotic stress".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_restore_rejects_overcommitted_snapshot() {
        let hypervisor = small(SchedulingPolicy::RoundRobin).await;
        hypervisor.create_vm(&request("a", 2.0)).await.unwrap();
        let mut snapshot = hypervisor.snapshot().await;

        let mut twin = snapshot.vms[0].clone();
        twin.vm_id = "b".to_string();
        snapshot.vms.push(twin);

        assert!(matches!(
            Hypervisor::restore(&snapshot).await,
            Err(HypervisorError::ResourceExhausted { .. })
        ));
    }
}
