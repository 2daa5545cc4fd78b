//! CLI command handling

pub mod launch;
pub mod processes;

pub use launch::*;
pub use processes::*;
