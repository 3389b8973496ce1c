pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod util;

// Re-export main modules
pub use domain::chassis;
pub use domain::ledger;
pub use domain::resources;
pub use domain::scheduler;
pub use domain::snapshot;
pub use domain::vm;
pub use domain::{DispatchRound, Hypervisor, HypervisorError, Result};
pub use infrastructure::logging;
pub use infrastructure::metrics;
