//! Execution context for task running
//!
//! The context holds the per-invocation settings shared by every task of a
//! run. It is never mutated once the run starts, so tasks running on worker
//! threads can share it by reference.

use crate::error::ConfigError;
use crate::runner::cancel::CancelToken;
use crate::runner::taskfile::{Taskfile, DEFAULT_INTERPRETER};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

/// Execution context shared by all tasks of one invocation
#[derive(Debug, Clone)]
pub struct Context {
    /// Directory of the root document
    pub root_dir: PathBuf,

    /// Interpreter for shell commands (e.g., ["bash", "-c"])
    pub interpreter: Vec<String>,

    /// Inherited OS environment with dotenv files applied on top
    pub base_env: Arc<HashMap<String, String>>,

    /// Variables set on the command line; they win over every declaration
    pub overrides: IndexMap<String, String>,

    /// Arguments after `--`
    pub cli_args: Vec<String>,

    /// Ignore status probes and sources
    pub force: bool,

    /// Print commands instead of running them
    pub dry_run: bool,

    /// Run independent tasks of a plan level concurrently
    pub parallel: bool,

    /// Cancellation flag set by the interrupt handler
    pub cancel: CancelToken,

    /// Verbosity level
    pub verbosity: Verbosity,
}

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    Normal = 2,
    Verbose = 3,
}

impl Context {
    /// Create a new context with default settings
    pub fn new() -> Self {
        let root_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Context {
            root_dir,
            interpreter: DEFAULT_INTERPRETER.iter().map(|s| s.to_string()).collect(),
            base_env: Arc::new(env::vars().collect()),
            overrides: IndexMap::new(),
            cli_args: Vec::new(),
            force: false,
            dry_run: false,
            parallel: false,
            cancel: CancelToken::new(),
            verbosity: Verbosity::Normal,
        }
    }

    /// Create a context for a loaded taskfile
    ///
    /// Takes the root directory and interpreter from the taskfile and layers
    /// its dotenv files over the inherited environment.
    pub fn for_taskfile(taskfile: &Taskfile) -> Result<Self, ConfigError> {
        let mut base_env: HashMap<String, String> = env::vars().collect();

        for path in &taskfile.dotenv {
            if !path.is_file() {
                tracing::debug!(path = %path.display(), "dotenv file not found, skipping");
                continue;
            }
            let entries = dotenvy::from_path_iter(path).map_err(|e| ConfigError::Dotenv {
                path: path.clone(),
                error: e.to_string(),
            })?;
            for entry in entries {
                let (key, value) = entry.map_err(|e| ConfigError::Dotenv {
                    path: path.clone(),
                    error: e.to_string(),
                })?;
                base_env.insert(key, value);
            }
        }

        Ok(Context {
            root_dir: taskfile.root_dir.clone(),
            interpreter: taskfile.interpreter.clone(),
            base_env: Arc::new(base_env),
            ..Context::new()
        })
    }

    /// Set command-line variable overrides
    pub fn with_overrides(mut self, overrides: IndexMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Set passthrough arguments
    pub fn with_cli_args(mut self, args: Vec<String>) -> Self {
        self.cli_args = args;
        self
    }

    /// Ignore up-to-date checks
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Print instead of executing
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Execute plan levels concurrently
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Use an existing cancellation token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set verbosity level
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Whether command output is echoed
    pub fn shows_output(&self) -> bool {
        self.verbosity >= Verbosity::Quiet
    }

    /// Whether commands and progress lines are echoed
    pub fn shows_progress(&self) -> bool {
        self.verbosity >= Verbosity::Normal
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_context_new() {
        let ctx = Context::new();
        assert_eq!(ctx.verbosity, Verbosity::Normal);
        assert_eq!(ctx.interpreter, vec!["sh", "-c"]);
        assert!(ctx.overrides.is_empty());
        assert!(!ctx.force && !ctx.dry_run && !ctx.parallel);
    }

    #[test]
    fn test_verbosity_levels() {
        assert!(Verbosity::Verbose > Verbosity::Normal);
        assert!(Verbosity::Normal > Verbosity::Quiet);
        assert!(Verbosity::Quiet > Verbosity::Silent);
    }

    #[test]
    fn test_output_gating() {
        let quiet = Context::new().with_verbosity(Verbosity::Quiet);
        assert!(quiet.shows_output());
        assert!(!quiet.shows_progress());

        let silent = Context::new().with_verbosity(Verbosity::Silent);
        assert!(!silent.shows_output());
    }

    #[test]
    fn test_dotenv_layers_over_environment() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(".env"), "TASKGRAPH_DOTENV_TEST=from-file\n").unwrap();
        let yaml = "dotenv: [.env, missing.env]\ntasks: {}\n";
        let taskfile = Taskfile::from_yaml(yaml, &temp_dir.path().join("Taskfile.yml")).unwrap();

        let ctx = Context::for_taskfile(&taskfile).unwrap();
        assert_eq!(
            ctx.base_env.get("TASKGRAPH_DOTENV_TEST").map(String::as_str),
            Some("from-file")
        );
        assert_eq!(ctx.root_dir, temp_dir.path());
        assert!(Path::new(&ctx.root_dir).is_dir());
    }
}
