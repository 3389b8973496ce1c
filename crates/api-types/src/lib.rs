//! Shared API type definitions
//!
//! This crate contains the request and response shapes of the hypervisor's
//! programmatic surface: VM creation requests, lifecycle results, status and
//! system resource queries, and setup-time chassis registrations. Resource
//! amounts travel as plain `kind -> amount` maps; the hypervisor validates kinds
//! and arithmetic domains at its boundary.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Lifecycle state of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VmState {
    Created,
    Running,
    Paused,
    Stopped,
    Destroyed,
    Failed,
}

impl VmState {
    /// All states, in lifecycle order.
    pub const ALL: [VmState; 6] = [
        VmState::Created,
        VmState::Running,
        VmState::Paused,
        VmState::Stopped,
        VmState::Destroyed,
        VmState::Failed,
    ];

    /// `DESTROYED` and `FAILED` accept no further operations.
    pub fn is_terminal(self) -> bool {
        matches!(self, VmState::Destroyed | VmState::Failed)
    }

    /// Only running VMs compete for execution slots.
    pub fn is_runnable(self) -> bool {
        self == VmState::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VmState::Created => "CREATED",
            VmState::Running => "RUNNING",
            VmState::Paused => "PAUSED",
            VmState::Stopped => "STOPPED",
            VmState::Destroyed => "DESTROYED",
            VmState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to admit a new VM onto a chassis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVmRequest {
    /// Caller-chosen VM id, unique among live VMs
    pub vm_id: String,
    /// Name of a registered chassis
    pub chassis: String,
    /// Requested amount per resource kind
    #[serde(default)]
    pub resources: BTreeMap<String, f64>,
    /// Scheduling priority, higher runs first under the priority policy
    #[serde(default)]
    pub priority: i64,
}

impl CreateVmRequest {
    pub fn new(vm_id: impl Into<String>, chassis: impl Into<String>) -> Self {
        Self {
            vm_id: vm_id.into(),
            chassis: chassis.into(),
            resources: BTreeMap::new(),
            priority: 0,
        }
    }

    pub fn with_resource(mut self, kind: impl Into<String>, amount: f64) -> Self {
        self.resources.insert(kind.into(), amount);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// Status of a single VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmStatus {
    pub vm_id: String,
    pub chassis: String,
    pub state: VmState,
    /// Resources currently held; empty once the grant has been released
    pub resources_held: BTreeMap<String, f64>,
    pub priority: i64,
    pub generation: u64,
}

/// Allocation accounting of one resource kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub allocated: f64,
    /// Capacity net of the chassis' reserved overhead
    pub capacity: f64,
}

/// Response of a system resource query for one chassis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemResources {
    pub chassis: String,
    pub healthy: bool,
    pub resources: BTreeMap<String, ResourceUsage>,
    /// Number of VM records per state on this chassis
    pub vm_counts: BTreeMap<VmState, usize>,
}

/// Setup-time chassis registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChassisRegistration {
    pub name: String,
    /// Raw capacity per resource kind, before overhead
    pub resources: BTreeMap<String, f64>,
    /// Fraction of every capacity reserved for system overhead, in `[0, 1)`
    #[serde(default)]
    pub overhead_fraction: f64,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    /// Why the chassis was marked unhealthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy_reason: Option<String>,
}

fn default_healthy() -> bool {
    true
}

impl ChassisRegistration {
    pub fn new(name: impl Into<String>, overhead_fraction: f64) -> Self {
        Self {
            name: name.into(),
            resources: BTreeMap::new(),
            overhead_fraction,
            healthy: true,
            unhealthy_reason: None,
        }
    }

    pub fn with_resource(mut self, kind: impl Into<String>, capacity: f64) -> Self {
        self.resources.insert(kind.into(), capacity);
        self
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn vm_state_serializes_uppercase() {
        let json = serde_json::to_string(&VmState::Paused).unwrap();
        assert_eq!(json, "\"PAUSED\"");
        assert_eq!(VmState::Paused.to_string(), "PAUSED");
    }

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = VmState::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![VmState::Destroyed, VmState::Failed]);
    }

    #[test]
    fn create_request_deserializes_camel_case_with_defaults() {
        let req: CreateVmRequest =
            serde_json::from_str(r#"{"vmId":"a","chassis":"small","resources":{"slots":1}}"#)
                .unwrap();
        assert_eq!(
            req,
            CreateVmRequest::new("a", "small").with_resource("slots", 1.0)
        );
    }

    #[test]
    fn registration_defaults_to_healthy() {
        let reg: ChassisRegistration =
            serde_json::from_str(r#"{"name":"small","resources":{"slots":2}}"#).unwrap();
        assert!(reg.healthy);
        assert_eq!(reg.overhead_fraction, 0.0);
    }
}
