//! Name-keyed registry of chassis profiles and their health

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};

use super::traits::HealthProbe;
use super::types::ChassisProfile;
use crate::domain::error::{HypervisorError, Result};

/// Latched health of a chassis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChassisHealth {
    pub healthy: bool,
    pub reason: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl ChassisHealth {
    fn healthy() -> Self {
        Self {
            healthy: true,
            reason: None,
            checked_at: None,
        }
    }

    fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason: Some(reason.into()),
            checked_at: None,
        }
    }
}

#[derive(Debug)]
struct ChassisEntry {
    profile: Arc<ChassisProfile>,
    health: ChassisHealth,
}

/// Registry of chassis profiles
///
/// Profiles are immutable once registered. Health is the only mutable part and
/// is latched from the last probe or from an explicit [`set_health`] call.
///
/// [`set_health`]: ChassisRegistry::set_health
pub struct ChassisRegistry {
    chassis: DashMap<String, ChassisEntry>,
    probe: Option<Arc<dyn HealthProbe>>,
}

impl std::fmt::Debug for ChassisRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChassisRegistry")
            .field("chassis", &self.chassis)
            .field("probe", &self.probe.is_some())
            .finish()
    }
}

impl Default for ChassisRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChassisRegistry {
    pub fn new() -> Self {
        Self {
            chassis: DashMap::new(),
            probe: None,
        }
    }

    pub fn with_probe(probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            chassis: DashMap::new(),
            probe: Some(probe),
        }
    }

    /// Registers a profile; fails if the name is already taken.
    ///
    /// `reason` is latched with an unhealthy registration.
    pub fn register(
        &self,
        profile: ChassisProfile,
        healthy: bool,
        reason: Option<String>,
    ) -> Result<Arc<ChassisProfile>> {
        match self.chassis.entry(profile.name().to_string()) {
            Entry::Occupied(occupied) => Err(HypervisorError::DuplicateChassis {
                name: occupied.key().clone(),
            }),
            Entry::Vacant(vacant) => {
                let profile = Arc::new(profile);
                let health = if healthy {
                    ChassisHealth::healthy()
                } else {
                    ChassisHealth::unhealthy(
                        reason.unwrap_or_else(|| "registered as unhealthy".to_string()),
                    )
                };
                info!(
                    chassis = %profile.name(),
                    overhead_fraction = profile.overhead_fraction(),
                    kinds = profile.effective_capacity().len(),
                    healthy = healthy,
                    "Chassis registered"
                );
                vacant.insert(ChassisEntry {
                    profile: Arc::clone(&profile),
                    health,
                });
                Ok(profile)
            }
        }
    }

    pub fn capabilities(&self, name: &str) -> Result<Arc<ChassisProfile>> {
        self.chassis
            .get(name)
            .map(|entry| Arc::clone(&entry.profile))
            .ok_or_else(|| HypervisorError::UnknownChassis {
                name: name.to_string(),
            })
    }

    pub fn health(&self, name: &str) -> Result<ChassisHealth> {
        self.chassis
            .get(name)
            .map(|entry| entry.health.clone())
            .ok_or_else(|| HypervisorError::UnknownChassis {
                name: name.to_string(),
            })
    }

    /// Returns the profile if the chassis may accept new allocations.
    pub fn ensure_healthy(&self, name: &str) -> Result<Arc<ChassisProfile>> {
        let entry = self
            .chassis
            .get(name)
            .ok_or_else(|| HypervisorError::UnknownChassis {
                name: name.to_string(),
            })?;
        if entry.health.healthy {
            Ok(Arc::clone(&entry.profile))
        } else {
            Err(HypervisorError::ChassisUnhealthy {
                name: name.to_string(),
                reason: entry
                    .health
                    .reason
                    .clone()
                    .unwrap_or_else(|| "marked unhealthy".to_string()),
            })
        }
    }

    /// Runs the configured probe and latches its result.
    ///
    /// Without a probe this only reports the latched state, so it succeeds unless
    /// the chassis has been marked unhealthy.
    pub async fn health_check(&self, name: &str) -> Result<()> {
        let profile = self.capabilities(name)?;

        if let Some(probe) = &self.probe {
            let outcome = probe.probe(&profile).await;
            let mut entry = self
                .chassis
                .get_mut(name)
                .ok_or_else(|| HypervisorError::UnknownChassis {
                    name: name.to_string(),
                })?;
            entry.health = match outcome {
                Ok(()) => ChassisHealth::healthy(),
                Err(reason) => {
                    warn!(chassis = %name, reason = %reason, "Chassis health probe failed");
                    ChassisHealth::unhealthy(reason)
                }
            };
            entry.health.checked_at = Some(Utc::now());
        }

        self.ensure_healthy(name).map(|_| ())
    }

    /// Propagates a health verdict from the profile provider.
    pub fn set_health(&self, name: &str, healthy: bool, reason: Option<String>) -> Result<()> {
        let mut entry = self
            .chassis
            .get_mut(name)
            .ok_or_else(|| HypervisorError::UnknownChassis {
                name: name.to_string(),
            })?;
        entry.health = if healthy {
            ChassisHealth::healthy()
        } else {
            ChassisHealth::unhealthy(reason.unwrap_or_else(|| "marked unhealthy".to_string()))
        };
        entry.health.checked_at = Some(Utc::now());
        info!(chassis = %name, healthy = healthy, "Chassis health updated");
        Ok(())
    }

    /// Registered chassis names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chassis.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.chassis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chassis.is_empty()
    }
}
