//! taskgraph - a YAML task-graph runner
//!
//! Tasks are declared in a Taskfile with dependencies, variables,
//! preconditions and status probes. A requested task is expanded into an
//! execution plan of its dependencies, and each task in the plan is skipped
//! when its status probes say it is already done.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod runner;

// Re-export commonly used types
pub use error::{Result, TaskgraphError};

/// Current version of taskgraph
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
