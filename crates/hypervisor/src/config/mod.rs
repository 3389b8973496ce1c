pub mod catalog;
pub mod cli;
pub mod run;

pub use catalog::*;
pub use cli::*;
pub use run::*;
