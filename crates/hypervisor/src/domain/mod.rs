pub mod chassis;
pub mod error;
pub mod hypervisor;
pub mod ledger;
pub mod resources;
pub mod scheduler;
pub mod snapshot;
pub mod vm;

pub use error::{HypervisorError, Result};
pub use hypervisor::{DispatchRound, Hypervisor};
