//! Error type shared by every hypervisor operation
//!
//! Each failure is scoped to the single requested operation and is returned to
//! the caller as a value. None of them is fatal to the process.

use api_types::VmState;

use super::resources::{Amount, ResourceKind};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HypervisorError {
    #[error("Unknown chassis: {name}")]
    UnknownChassis { name: String },

    #[error("Chassis already registered: {name}")]
    DuplicateChassis { name: String },

    #[error("VM already exists: {vm_id}")]
    DuplicateVm { vm_id: String },

    #[error(
        "Resource exhausted on chassis {chassis}: {kind} requested {requested}, available {available}"
    )]
    ResourceExhausted {
        chassis: String,
        kind: ResourceKind,
        requested: Amount,
        available: Amount,
    },

    #[error("Invalid state transition for VM {vm_id}: {current} -> {attempted}")]
    InvalidStateTransition {
        vm_id: String,
        current: VmState,
        attempted: VmState,
    },

    #[error("VM not found: {vm_id}")]
    VmNotFound { vm_id: String },

    #[error("Chassis {name} is unhealthy: {reason}")]
    ChassisUnhealthy { name: String, reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Invalid chassis profile {name}: {reason}")]
    InvalidProfile { name: String, reason: String },
}

impl HypervisorError {
    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn vm_not_found(vm_id: impl ToString) -> Self {
        Self::VmNotFound {
            vm_id: vm_id.to_string(),
        }
    }

    /// Whether the caller may reasonably retry the same request later.
    ///
    /// Only exhaustion and health failures depend on state that other callers
    /// change; everything else is a caller error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted { .. } | Self::ChassisUnhealthy { .. }
        )
    }
}

/// Result type for hypervisor operations
pub type Result<T> = std::result::Result<T, HypervisorError>;
