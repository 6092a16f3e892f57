//! Runtime task representation
//!
//! This differs from `config::Task` by carrying qualified names, resolved
//! directories and parsed timeouts. Commands and probes are separate types so
//! a precondition can never be mistaken for part of the task body.

use crate::config::{self, Declarations, EnvScope, VarDef};
use crate::config::schema::parse_timeout;
use crate::error::ConfigResult;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A task ready for planning and execution
#[derive(Debug, Clone)]
pub struct Task {
    /// Qualified name (`namespace:task`, or just `task` at the root)
    pub name: String,

    /// Qualified namespace name ("" for the root)
    pub namespace: String,

    /// Short description
    pub desc: Option<String>,

    /// Qualified alias names
    pub aliases: Vec<String>,

    /// Qualified, deduplicated dependency names in declaration order
    pub deps: Vec<String>,

    /// Working directory
    pub dir: PathBuf,

    /// Task-level variable declarations
    pub vars: Declarations<VarDef>,

    /// Guards evaluated before the body
    pub preconditions: Vec<Probe>,

    /// Idempotency probes
    pub status: Vec<Probe>,

    /// Source patterns for the timestamp check
    pub sources: Vec<String>,

    /// Generated-file patterns for the timestamp check
    pub generates: Vec<String>,

    /// Environment propagation between commands
    pub env_scope: EnvScope,

    /// Timeout applied to every command
    pub timeout: Option<Duration>,

    /// Do not echo commands
    pub silent: bool,

    /// Hidden from `list`, not invocable directly
    pub private: bool,

    /// Commands to execute, in order
    pub cmds: Vec<Command>,
}

impl Task {
    /// Create a runtime task from configuration
    ///
    /// Dependencies are qualified textually here; whether they exist is
    /// checked once the whole tree is known.
    pub fn from_config(
        namespace: &str,
        namespace_dir: &Path,
        local_name: &str,
        config: config::Task,
    ) -> ConfigResult<Self> {
        let name = qualify(namespace, local_name);

        let timeout = match &config.timeout {
            Some(value) => Some(parse_timeout(&name, value)?),
            None => None,
        };

        let dir = match &config.dir {
            Some(dir) => namespace_dir.join(dir),
            None => namespace_dir.to_path_buf(),
        };

        Ok(Task {
            desc: config.desc,
            aliases: config
                .aliases
                .iter()
                .map(|alias| qualify(namespace, alias))
                .collect(),
            deps: config
                .deps
                .iter()
                .map(|dep| resolve_reference(namespace, dep))
                .collect(),
            dir,
            vars: config.vars,
            preconditions: config
                .preconditions
                .into_iter()
                .map(Probe::from_precondition)
                .collect(),
            status: config.status.into_iter().map(Probe::new).collect(),
            sources: config.sources,
            generates: config.generates,
            env_scope: config.env_scope,
            timeout,
            silent: config.silent,
            private: config.private,
            cmds: config.cmds.into_iter().map(Command::from_config).collect(),
            namespace: namespace.to_string(),
            name,
        })
    }

    /// Name without the namespace prefix
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    /// Whether the task declares anything that can mark it up to date
    pub fn has_up_to_date_checks(&self) -> bool {
        !self.status.is_empty() || !self.sources.is_empty()
    }
}

/// A shell probe (precondition or status check)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Shell command; exit code 0 means the probe passed
    pub sh: String,

    /// Message reported when a precondition fails
    pub msg: Option<String>,
}

impl Probe {
    pub fn new(sh: String) -> Self {
        Probe { sh, msg: None }
    }

    pub fn from_precondition(config: config::Precondition) -> Self {
        match config {
            config::Precondition::Simple(sh) => Probe { sh, msg: None },
            config::Precondition::Complex { sh, msg } => Probe { sh, msg },
        }
    }
}

/// A command in a task body
#[derive(Debug, Clone)]
pub struct Command {
    /// The shell command
    pub cmd: String,

    /// Environment entries set for this command
    pub env: Declarations<String>,

    /// Working directory relative to the task directory
    pub dir: Option<String>,

    /// Do not echo the command
    pub silent: bool,

    /// Continue with the next command on failure
    pub ignore_error: bool,
}

impl Command {
    /// Create from config
    pub fn from_config(config: config::Command) -> Self {
        match config {
            config::Command::Simple(cmd) => Command {
                cmd,
                env: Vec::new(),
                dir: None,
                silent: false,
                ignore_error: false,
            },
            config::Command::Complex(detail) => Command {
                cmd: detail.cmd,
                env: detail.env,
                dir: detail.dir,
                silent: detail.silent,
                ignore_error: detail.ignore_error,
            },
        }
    }
}

/// Join a namespace and a local name
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}:{}", namespace, name)
    }
}

/// Resolve a task reference made from inside `namespace`
///
/// Bare names are local to the namespace, names containing `:` are absolute,
/// and a leading `:` names a root task explicitly.
pub fn resolve_reference(namespace: &str, reference: &str) -> String {
    if let Some(absolute) = reference.strip_prefix(':') {
        absolute.to_string()
    } else if reference.contains(':') {
        reference.to_string()
    } else {
        qualify(namespace, reference)
    }
}
