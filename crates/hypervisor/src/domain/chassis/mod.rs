//! Chassis capability profiles and their name-keyed registry

pub mod registry;
pub mod traits;
pub mod types;

pub use registry::{ChassisHealth, ChassisRegistry};
pub use traits::HealthProbe;
pub use types::ChassisProfile;
