//! Task execution engine
//!
//! This module builds the task tree, plans a requested task and runs the
//! plan: variable resolution, preconditions, up-to-date checks and the
//! commands themselves.

pub mod cancel;
pub mod command;
pub mod context;
pub mod executor;
pub mod interpolate;
pub mod output;
pub mod plan;
pub mod probe;
pub mod sources;
pub mod task;
pub mod taskfile;
pub mod vars;

// Re-export main types
pub use cancel::CancelToken;
pub use command::{CommandOutput, ExitState, ShellCommand};
pub use context::{Context, Verbosity};
pub use executor::{Executor, RunReport, TaskOutcome, TaskResult};
pub use interpolate::interpolate;
pub use output::{Stream, TaskOutput};
pub use plan::ExecutionPlan;
pub use task::{Command, Probe, Task};
pub use taskfile::{Namespace, Taskfile};
pub use vars::{Bindings, VariableResolver};
