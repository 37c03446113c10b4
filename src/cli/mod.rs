//! CLI command handling

pub mod cleanup;
pub mod run;

pub use cleanup::*;
pub use run::*;
