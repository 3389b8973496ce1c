//! Chassis capability profiles

use api_types::ChassisRegistration;
use serde::{Deserialize, Serialize};

use crate::domain::error::{HypervisorError, Result};
use crate::domain::resources::{Amount, ResourceBag, ResourceDomain, ResourceKind};

/// Immutable capability profile of a chassis
///
/// The reserved overhead is applied once, here, producing the effective capacity
/// every ledger check uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChassisProfile {
    name: String,
    raw_capacity: ResourceBag,
    overhead_fraction: f64,
    effective_capacity: ResourceBag,
}

impl ChassisProfile {
    pub fn new(
        name: impl Into<String>,
        raw_capacity: ResourceBag,
        overhead_fraction: f64,
    ) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: String| HypervisorError::InvalidProfile {
            name: name.clone(),
            reason,
        };

        if name.trim().is_empty() {
            return Err(invalid("chassis name must not be empty".to_string()));
        }
        if !overhead_fraction.is_finite() || !(0.0..1.0).contains(&overhead_fraction) {
            return Err(invalid(format!(
                "overhead fraction must be in [0, 1), got {overhead_fraction}"
            )));
        }
        if raw_capacity.is_empty() {
            return Err(invalid("at least one resource kind is required".to_string()));
        }

        let effective_capacity = raw_capacity
            .iter()
            .map(|(kind, capacity)| {
                let net = capacity.scale(1.0 - overhead_fraction);
                let net = match kind.domain() {
                    ResourceDomain::Integer => net.floor_units(),
                    _ => net,
                };
                (kind.clone(), net)
            })
            .collect();

        Ok(Self {
            name,
            raw_capacity,
            overhead_fraction,
            effective_capacity,
        })
    }

    /// Builds a profile from a setup-time registration, validating each capacity
    /// against its kind's domain.
    pub fn from_registration(registration: &ChassisRegistration) -> Result<Self> {
        let raw_capacity = ResourceBag::from_raw(&registration.resources).map_err(|e| {
            HypervisorError::InvalidProfile {
                name: registration.name.clone(),
                reason: e.to_string(),
            }
        })?;
        Self::new(
            registration.name.clone(),
            raw_capacity,
            registration.overhead_fraction,
        )
    }

    pub fn to_registration(&self, healthy: bool, reason: Option<String>) -> ChassisRegistration {
        ChassisRegistration {
            name: self.name.clone(),
            resources: self.raw_capacity.to_raw(),
            overhead_fraction: self.overhead_fraction,
            healthy,
            unhealthy_reason: reason.filter(|_| !healthy),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn overhead_fraction(&self) -> f64 {
        self.overhead_fraction
    }

    pub fn raw_capacity(&self) -> &ResourceBag {
        &self.raw_capacity
    }

    /// Capacity net of reserved overhead
    pub fn effective_capacity(&self) -> &ResourceBag {
        &self.effective_capacity
    }

    pub fn capacity(&self, kind: &ResourceKind) -> Option<Amount> {
        self.effective_capacity
            .contains(kind)
            .then(|| self.effective_capacity.get(kind))
    }

    /// Rejects requests naming kinds this chassis does not expose.
    pub fn validate_request(&self, requested: &ResourceBag) -> Result<()> {
        match requested
            .kinds()
            .find(|kind| !self.effective_capacity.contains(kind))
        {
            Some(kind) => Err(HypervisorError::invalid_request(format!(
                "chassis {} does not provide resource kind {kind}",
                self.name
            ))),
            None => Ok(()),
        }
    }

    /// Number of VMs that may be active in one dispatch tick.
    pub fn dispatch_width(&self) -> usize {
        self.capacity(&ResourceKind::ExecutionSlots)
            .map(|slots| slots.whole_units() as usize)
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn registration(overhead: f64) -> ChassisRegistration {
        ChassisRegistration::new("test", overhead)
            .with_resource("slots", 10.0)
            .with_resource("energy", 100.0)
            .with_resource("memory", 1024.0)
    }

    #[test]
    fn test_overhead_reduces_effective_capacity() {
        let profile = ChassisProfile::from_registration(&registration(0.2)).unwrap();
        assert_eq!(
            profile.capacity(&ResourceKind::ExecutionSlots),
            Some(Amount::from_units(8))
        );
        assert_eq!(
            profile.capacity(&ResourceKind::Energy),
            Some(Amount::from_units(80))
        );
        assert_eq!(profile.dispatch_width(), 8);
        assert_eq!(profile.raw_capacity().get(&ResourceKind::ExecutionSlots), Amount::from_units(10));
    }

    #[test]
    fn test_integer_kinds_floor_after_overhead() {
        let profile = ChassisProfile::from_registration(
            &ChassisRegistration::new("tiny", 0.15)
                .with_resource("slots", 2.0)
                .with_resource("energy", 10.0),
        )
        .unwrap();
        assert_eq!(
            profile.capacity(&ResourceKind::ExecutionSlots),
            Some(Amount::from_units(1))
        );
        assert_eq!(
            profile.capacity(&ResourceKind::Energy),
            Some(Amount::from_millis(8_500))
        );
    }

    #[test]
    fn test_invalid_profiles_are_rejected() {
        for overhead in [-0.1, 1.0, f64::NAN] {
            assert!(matches!(
                ChassisProfile::from_registration(&registration(overhead)),
                Err(HypervisorError::InvalidProfile { .. })
            ));
        }

        let over_energy = ChassisRegistration::new("hot", 0.0).with_resource("energy", 150.0);
        assert!(matches!(
            ChassisProfile::from_registration(&over_energy),
            Err(HypervisorError::InvalidProfile { .. })
        ));

        let empty = ChassisRegistration::new("empty", 0.0);
        assert!(ChassisProfile::from_registration(&empty).is_err());
    }

    #[test]
    fn test_dispatch_width_without_slots() {
        let profile = ChassisProfile::from_registration(
            &ChassisRegistration::new("energy-only", 0.0).with_resource("energy", 100.0),
        )
        .unwrap();
        assert_eq!(profile.dispatch_width(), 1);
    }

    #[test]
    fn test_validate_request_rejects_unknown_kind() {
        let profile = ChassisProfile::from_registration(&registration(0.0)).unwrap();
        let request =
            ResourceBag::new().with(ResourceKind::Custom("nadh".to_string()), Amount::from_units(1));
        assert!(matches!(
            profile.validate_request(&request),
            Err(HypervisorError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_registration_round_trip_preserves_raw_capacity() {
        let reg = registration(0.2);
        let profile = ChassisProfile::from_registration(&reg).unwrap();
        assert_eq!(profile.to_registration(true, None), reg);
    }
}
