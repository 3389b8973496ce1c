//! Process-wide helpers shared by the hypervisor binaries: tracing setup and
//! the build version string.

mod build_info;
pub mod logging;
pub mod version;
