//! Per-chassis resource accounting
//!
//! A [`Ledger`] holds, for every resource kind of one chassis, how much is
//! allocated against the capacity left after reserved overhead. Allocation is
//! all-or-nothing across the requested kinds, so `allocated <= capacity` holds
//! for every kind after every call.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, error, warn};

use super::chassis::ChassisProfile;
use super::error::{HypervisorError, Result};
use super::resources::{Amount, ResourceBag, ResourceGrant, ResourceKind};

/// Accounting of one resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LedgerLine {
    pub allocated: Amount,
    /// Capacity net of reserved overhead
    pub capacity: Amount,
}

impl LedgerLine {
    pub fn available(&self) -> Amount {
        self.capacity.saturating_sub(self.allocated)
    }
}

#[derive(Debug)]
pub struct Ledger {
    chassis: String,
    lines: BTreeMap<ResourceKind, LedgerLine>,
}

impl Ledger {
    pub fn new(profile: &ChassisProfile) -> Self {
        let lines = profile
            .effective_capacity()
            .iter()
            .map(|(kind, capacity)| {
                (
                    kind.clone(),
                    LedgerLine {
                        allocated: Amount::ZERO,
                        capacity: *capacity,
                    },
                )
            })
            .collect();
        Self {
            chassis: profile.name().to_string(),
            lines,
        }
    }

    pub fn chassis(&self) -> &str {
        &self.chassis
    }

    /// Checks every requested kind, then commits all of them.
    ///
    /// Nothing is committed if any kind is unknown or would exceed capacity.
    pub fn allocate(&mut self, requested: &ResourceBag) -> Result<ResourceGrant> {
        for (kind, amount) in requested.iter() {
            let line = self.lines.get(kind).ok_or_else(|| {
                HypervisorError::invalid_request(format!(
                    "chassis {} does not provide resource kind {kind}",
                    self.chassis
                ))
            })?;
            let fits = line
                .allocated
                .checked_add(*amount)
                .is_some_and(|total| total <= line.capacity);
            if !fits {
                return Err(HypervisorError::ResourceExhausted {
                    chassis: self.chassis.clone(),
                    kind: kind.clone(),
                    requested: *amount,
                    available: line.available(),
                });
            }
        }

        for (kind, amount) in requested.iter() {
            if let Some(line) = self.lines.get_mut(kind) {
                if let Some(total) = line.allocated.checked_add(*amount) {
                    line.allocated = total;
                }
            }
        }
        debug_assert!(self.is_within_capacity());

        debug!(chassis = %self.chassis, kinds = requested.len(), "Resources allocated");
        Ok(ResourceGrant::new(self.chassis.clone(), requested.clone()))
    }

    /// Returns a grant, subtracting its amounts clamped at zero.
    ///
    /// Returns the amounts actually subtracted. A grant issued by another
    /// chassis' ledger is refused and nothing changes.
    pub fn release(&mut self, grant: ResourceGrant) -> ResourceBag {
        if grant.chassis() != self.chassis {
            error!(
                ledger = %self.chassis,
                grant_chassis = %grant.chassis(),
                "Refusing to release a grant issued by another chassis"
            );
            return ResourceBag::new();
        }

        let mut released = ResourceBag::new();
        for (kind, amount) in grant.into_amounts().iter() {
            let Some(line) = self.lines.get_mut(kind) else {
                continue;
            };
            let subtracted = if *amount > line.allocated {
                warn!(
                    chassis = %self.chassis,
                    kind = %kind,
                    allocated = %line.allocated,
                    releasing = %amount,
                    "Release exceeds allocation, clamping at zero"
                );
                line.allocated
            } else {
                *amount
            };
            line.allocated = line.allocated.saturating_sub(subtracted);
            released.insert(kind.clone(), subtracted);
        }

        debug!(chassis = %self.chassis, kinds = released.len(), "Resources released");
        released
    }

    /// Advisory headroom per kind; callers must still handle a failing allocate.
    pub fn query_available(&self) -> ResourceBag {
        self.lines
            .iter()
            .map(|(kind, line)| (kind.clone(), line.available()))
            .collect()
    }

    pub fn usage(&self) -> &BTreeMap<ResourceKind, LedgerLine> {
        &self.lines
    }

    pub fn allocated(&self, kind: &ResourceKind) -> Amount {
        self.lines
            .get(kind)
            .map(|line| line.allocated)
            .unwrap_or(Amount::ZERO)
    }

    pub fn is_within_capacity(&self) -> bool {
        self.lines
            .values()
            .all(|line| line.allocated <= line.capacity)
    }
}
