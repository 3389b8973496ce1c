//! Application wiring: building the orchestrator from configuration, running
//! its background tasks and shutting down gracefully.

pub mod builder;
pub mod core;
pub mod tasks;

pub use builder::ApplicationBuilder;
pub use self::core::Application;
