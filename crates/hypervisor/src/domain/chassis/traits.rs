//! Seams to external chassis profile providers

use super::types::ChassisProfile;

/// Health check supplied by the chassis profile provider
///
/// A failing probe makes the chassis ineligible for new allocations; VMs already
/// running on it are unaffected.
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    /// Returns `Err(reason)` when the chassis cannot accept new VMs.
    async fn probe(&self, profile: &ChassisProfile) -> Result<(), String>;
}
