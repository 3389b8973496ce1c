pub mod registry;
pub mod state;
pub mod types;

pub use registry::VmRegistry;
pub use state::{next_state, VmEvent};
pub use types::{Transition, VirtualMachine, VmHandle, VmId};
