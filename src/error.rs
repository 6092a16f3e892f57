//! Error types for taskgraph

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for configuration errors, unknown tasks and other generic failures
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for a failed precondition
pub const EXIT_PRECONDITION: i32 = 2;

/// Exit code after an interrupt signal
pub const EXIT_INTERRUPTED: i32 = 130;

/// Number of captured output lines shown when a command fails
pub const OUTPUT_TAIL_LINES: usize = 20;

/// Result type alias for taskgraph operations
pub type Result<T> = std::result::Result<T, TaskgraphError>;

/// Main error type for taskgraph
#[derive(Error, Debug)]
pub enum TaskgraphError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Execution plan errors
    #[error("{0}")]
    Plan(#[from] PlanError),

    /// Task execution errors
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TaskgraphError {
    /// Process exit code this error maps to
    pub fn exit_code(&self) -> i32 {
        match self {
            TaskgraphError::Execution(e) => e.exit_code(),
            _ => EXIT_FAILURE,
        }
    }

    /// Pipeline stage the error occurred in, if it belongs to one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            TaskgraphError::Plan(_) => Some(Stage::Graph),
            TaskgraphError::Execution(e) => e.stage(),
            _ => None,
        }
    }

    /// Tail of the captured output for command failures
    pub fn output_tail(&self) -> Option<String> {
        match self {
            TaskgraphError::Execution(ExecutionError::CommandFailed { output, .. }) => {
                Some(tail_lines(output, OUTPUT_TAIL_LINES))
            }
            _ => None,
        }
    }
}

/// Stages of the per-task pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Graph,
    Resolve,
    Precondition,
    Status,
    Execute,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Graph => "graph",
            Stage::Resolve => "resolve",
            Stage::Precondition => "precondition",
            Stage::Status => "status",
            Stage::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// Configuration parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config file (searched: {0})")]
    NotFound(String),

    #[error("Failed to read '{path}': {error}")]
    Read { path: PathBuf, error: io::Error },

    #[error("Failed to parse '{path}': {error}")]
    Parse {
        path: PathBuf,
        error: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to include file '{path}': {error}")]
    IncludeFile { path: PathBuf, error: String },

    #[error("Include cycle detected at '{0}'")]
    IncludeCycle(PathBuf),

    #[error("Task '{name}' is defined more than once in {namespace}")]
    DuplicateTask { namespace: String, name: String },

    #[error("Alias '{alias}' in {namespace} conflicts with another task or alias")]
    DuplicateAlias { namespace: String, alias: String },

    #[error("Variable '{name}' in {scope} references '{referenced}', which is declared later in the same scope")]
    ForwardReference {
        scope: String,
        name: String,
        referenced: String,
    },

    #[error("Task '{task}' depends on '{dependency}', which is not defined")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Invalid timeout '{value}' for task '{task}': {error}")]
    InvalidTimeout {
        task: String,
        value: String,
        error: String,
    },

    #[error("Invalid glob pattern '{pattern}' in task '{task}': {error}")]
    InvalidGlob {
        task: String,
        pattern: String,
        error: String,
    },

    #[error("Failed to load dotenv file '{path}': {error}")]
    Dotenv { path: PathBuf, error: String },
}

/// Errors raised while expanding a task into an execution plan
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Task '{name}' is not defined{}", suggestion_hint(.suggestions))]
    UnknownTask {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("Circular dependency detected: {}", cycle_path(.cycle))]
    CycleDetected { cycle: Vec<String> },

    #[error("Task '{0}' is private and cannot be invoked directly")]
    PrivateTask(String),
}

impl PlanError {
    /// Names of the tasks on a detected cycle
    pub fn cycle(&self) -> Option<&[String]> {
        match self {
            PlanError::CycleDetected { cycle } => Some(cycle),
            _ => None,
        }
    }
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Task '{task}' failed (resolve): variable '{name}' could not be resolved: {stderr}")]
    VariableResolution {
        task: String,
        name: String,
        stderr: String,
    },

    #[error("Task '{task}' failed (precondition): {message}")]
    PreconditionFailed { task: String, message: String },

    #[error("Task '{task}' failed (execute): command #{index} `{command}` {}", exit_description(.exit_code))]
    CommandFailed {
        task: String,
        index: usize,
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Task '{task}' failed (execute): command #{index} `{command}` timed out after {}", format_timeout(.timeout))]
    Timeout {
        task: String,
        index: usize,
        command: String,
        timeout: std::time::Duration,
    },

    #[error("Task '{task}' failed ({stage}): could not start `{command}`: {error}")]
    Spawn {
        task: String,
        stage: Stage,
        command: String,
        error: io::Error,
    },

    #[error("Interrupted{}", interrupted_task(.task))]
    Interrupted { task: Option<String> },
}

impl ExecutionError {
    /// Process exit code this error maps to
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionError::PreconditionFailed { .. } => EXIT_PRECONDITION,
            ExecutionError::CommandFailed {
                exit_code: Some(code),
                ..
            } if *code != 0 => *code,
            ExecutionError::Interrupted { .. } => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Pipeline stage the error occurred in
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ExecutionError::VariableResolution { .. } => Some(Stage::Resolve),
            ExecutionError::PreconditionFailed { .. } => Some(Stage::Precondition),
            ExecutionError::CommandFailed { .. } | ExecutionError::Timeout { .. } => {
                Some(Stage::Execute)
            }
            ExecutionError::Spawn { stage, .. } => Some(*stage),
            ExecutionError::Interrupted { .. } => None,
        }
    }
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for planning operations
pub type PlanResult<T> = std::result::Result<T, PlanError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

fn suggestion_hint(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

fn cycle_path(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

fn format_timeout(timeout: &std::time::Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

fn interrupted_task(task: &Option<String>) -> String {
    match task {
        Some(task) => format!(" while running task '{}'", task),
        None => String::new(),
    }
}

/// Last `count` lines of `output`
pub fn tail_lines(output: &str, count: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
