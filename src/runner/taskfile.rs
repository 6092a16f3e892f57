//! The immutable configuration tree
//!
//! A `Taskfile` is built once per invocation from the loaded documents and
//! is passed by reference to the planner, resolver and executor.

use crate::config::{
    load_config_tree, load_config_tree_from_str, namespace_label, validate_config,
    validate_variables, Declarations, LoadedNamespace, VarDef,
};
use crate::error::{ConfigError, ConfigResult};
use crate::runner::task::Task;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Interpreter used when the document does not configure one
pub const DEFAULT_INTERPRETER: &[&str] = &["sh", "-c"];

/// Maximum number of suggestions for an unknown task name
const MAX_SUGGESTIONS: usize = 5;

/// A namespace and its variable scope
#[derive(Debug, Clone)]
pub struct Namespace {
    /// Qualified name ("" for the root)
    pub name: String,

    /// Qualified name of the including namespace
    pub parent: Option<String>,

    /// Base working directory
    pub dir: PathBuf,

    /// Variables passed by the include entry
    pub include_vars: Declarations<VarDef>,

    /// Namespace-level variables
    pub vars: Declarations<VarDef>,
}

/// All namespaces and tasks of one invocation
#[derive(Debug, Clone)]
pub struct Taskfile {
    /// Path of the root document
    pub path: PathBuf,

    /// Directory of the root document
    pub root_dir: PathBuf,

    /// Interpreter for every shell command
    pub interpreter: Vec<String>,

    /// Dotenv files, in load order
    pub dotenv: Vec<PathBuf>,

    namespaces: IndexMap<String, Namespace>,
    tasks: IndexMap<String, Task>,
    aliases: HashMap<String, String>,
}

impl Taskfile {
    /// Load and build the tree rooted at `path`
    pub fn load(path: &Path) -> ConfigResult<Self> {
        Self::build(load_config_tree(path)?)
    }

    /// Build the tree from a root document held in memory
    ///
    /// `path` locates the document; includes resolve relative to it.
    pub fn from_yaml(yaml: &str, path: &Path) -> ConfigResult<Self> {
        Self::build(load_config_tree_from_str(yaml, path)?)
    }

    /// Validate the loaded documents and assemble the tree
    pub fn build(loaded: Vec<LoadedNamespace>) -> ConfigResult<Self> {
        let root = loaded
            .first()
            .ok_or_else(|| ConfigError::Invalid("no root document".to_string()))?;

        let path = root.path.clone();
        let root_dir = root.dir.clone();
        let interpreter = root
            .config
            .interpreter
            .clone()
            .unwrap_or_else(|| DEFAULT_INTERPRETER.iter().map(|s| s.to_string()).collect());
        let dotenv = root.config.dotenv.iter().map(|p| root_dir.join(p)).collect();

        let mut namespaces = IndexMap::new();
        let mut tasks = IndexMap::new();

        for loaded_ns in loaded {
            validate_config(&loaded_ns.config, &loaded_ns.name)?;
            validate_variables(
                &format!("the include of {}", namespace_label(&loaded_ns.name)),
                &loaded_ns.include_vars,
            )?;

            for (local_name, task_config) in loaded_ns.config.tasks {
                let task = Task::from_config(&loaded_ns.name, &loaded_ns.dir, &local_name, task_config)?;
                tasks.insert(task.name.clone(), task);
            }

            namespaces.insert(
                loaded_ns.name.clone(),
                Namespace {
                    name: loaded_ns.name,
                    parent: loaded_ns.parent,
                    dir: loaded_ns.dir,
                    include_vars: loaded_ns.include_vars,
                    vars: loaded_ns.config.vars,
                },
            );
        }

        let mut aliases = HashMap::new();
        for task in tasks.values() {
            for alias in &task.aliases {
                if tasks.contains_key(alias) || aliases.contains_key(alias) {
                    return Err(ConfigError::DuplicateAlias {
                        namespace: namespace_label(&task.namespace),
                        alias: alias.clone(),
                    });
                }
                aliases.insert(alias.clone(), task.name.clone());
            }
        }

        let mut taskfile = Taskfile {
            path,
            root_dir,
            interpreter,
            dotenv,
            namespaces,
            tasks,
            aliases,
        };
        taskfile.link_dependencies()?;

        Ok(taskfile)
    }

    /// Map every dependency onto a canonical task name
    fn link_dependencies(&mut self) -> ConfigResult<()> {
        let mut linked = Vec::with_capacity(self.tasks.len());

        for task in self.tasks.values() {
            let mut deps: Vec<String> = Vec::with_capacity(task.deps.len());
            for dep in &task.deps {
                let target = self
                    .canonical_name(dep)
                    .ok_or_else(|| ConfigError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    })?;
                if target == task.name {
                    return Err(ConfigError::SelfDependency(task.name.clone()));
                }
                if !deps.iter().any(|d| d == target) {
                    deps.push(target.to_string());
                }
            }
            linked.push(deps);
        }

        for (task, deps) in self.tasks.values_mut().zip(linked) {
            task.deps = deps;
        }
        Ok(())
    }

    /// Canonical task name for a qualified name or alias
    fn canonical_name(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.tasks.get_key_value(name) {
            return Some(key.as_str());
        }
        self.aliases.get(name).map(String::as_str)
    }

    /// Task with this exact qualified name
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Look up a task as typed on the command line (name or alias)
    pub fn lookup(&self, reference: &str) -> Option<&Task> {
        let reference = reference.strip_prefix(':').unwrap_or(reference);
        self.canonical_name(reference).and_then(|name| self.tasks.get(name))
    }

    /// All tasks in declaration order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Namespace by qualified name
    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    /// All namespaces, root first
    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    /// Names of public tasks that look like `reference`
    pub fn suggest(&self, reference: &str) -> Vec<String> {
        let wanted = reference.trim_start_matches(':').to_lowercase();
        let wanted_local = wanted.rsplit(':').next().unwrap_or(&wanted).to_string();

        let candidates = self
            .tasks
            .values()
            .filter(|task| !task.private)
            .flat_map(|task| std::iter::once(&task.name).chain(task.aliases.iter()));

        let mut suggestions: Vec<String> = Vec::new();
        for candidate in candidates {
            let lower = candidate.to_lowercase();
            let local = lower.rsplit(':').next().unwrap_or(&lower);
            let similar = local == wanted_local
                || (wanted.len() >= 3 && lower.contains(&wanted))
                || (local.len() >= 3 && wanted.contains(local))
                || edit_distance(local, &wanted_local) <= max_typos(&wanted_local);
            if similar && !suggestions.contains(candidate) {
                suggestions.push(candidate.clone());
            }
            if suggestions.len() == MAX_SUGGESTIONS {
                break;
            }
        }
        suggestions
    }
}

/// Edit distance between `a` and `b`, counting a swap of adjacent
/// characters as one edit
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());

    let mut matrix = vec![vec![0usize; m + 1]; n + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, cell) in matrix[0].iter_mut().enumerate() {
        *cell = j;
    }

    for i in 1..=n {
        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (matrix[i - 1][j] + 1)
                .min(matrix[i][j - 1] + 1)
                .min(matrix[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(matrix[i - 2][j - 2] + 1);
            }
            matrix[i][j] = best;
        }
    }
    matrix[n][m]
}

/// Typos tolerated for a name of this length
fn max_typos(name: &str) -> usize {
    match name.chars().count() {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}
