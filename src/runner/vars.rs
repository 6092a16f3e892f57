//! Variable resolution
//!
//! A task's binding is built in layers: built-ins and command-line
//! overrides, then each namespace from the root down (include-passed
//! variables before the namespace's own), then the task's variables.
//! Namespace layers are computed once per invocation and copied into every
//! task that needs them.

use crate::config::{Declarations, VarDef};
use crate::error::{ExecutionError, ExecutionResult, Stage};
use crate::runner::command::{ExitState, ShellCommand};
use crate::runner::context::Context;
use crate::runner::interpolate::interpolate;
use crate::runner::task::Task;
use crate::runner::taskfile::Taskfile;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Resolved variables for one task execution
#[derive(Debug, Clone)]
pub struct Bindings {
    base: Arc<HashMap<String, String>>,
    values: IndexMap<String, String>,
}

impl Bindings {
    /// Empty binding over a base environment
    pub fn new(base: Arc<HashMap<String, String>>) -> Self {
        Bindings {
            base,
            values: IndexMap::new(),
        }
    }

    /// Value of a bound variable, falling back to the base environment
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .or_else(|| self.base.get(name))
            .map(String::as_str)
    }

    /// Whether `name` is bound (the base environment does not count)
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Bound variables in resolution order
    pub fn values(&self) -> &IndexMap<String, String> {
        &self.values
    }

    /// Substitute `{{.NAME}}` placeholders
    pub fn render(&self, template: &str) -> String {
        interpolate(template, |name| self.get(name).map(str::to_string))
    }

    /// Environment for a subprocess: base environment plus every binding
    pub fn environment(&self) -> HashMap<String, String> {
        let mut env = (*self.base).clone();
        env.extend(self.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

/// Resolves task bindings against one taskfile and context
pub struct VariableResolver<'a> {
    taskfile: &'a Taskfile,
    ctx: &'a Context,
    namespaces: Mutex<HashMap<String, Bindings>>,
}

impl<'a> VariableResolver<'a> {
    pub fn new(taskfile: &'a Taskfile, ctx: &'a Context) -> Self {
        VariableResolver {
            taskfile,
            ctx,
            namespaces: Mutex::new(HashMap::new()),
        }
    }

    /// Final binding for `task`
    pub fn resolve_task(&self, task: &Task) -> ExecutionResult<Bindings> {
        let mut bindings = self.namespace_bindings(&task.namespace, &task.name)?;
        if !bindings.contains("TASK") {
            bindings.insert("TASK", task.name.clone());
        }
        self.apply(&mut bindings, &task.vars, &task.dir, &task.name)?;
        Ok(bindings)
    }

    /// Resolve the namespace layers of `tasks` ahead of time
    ///
    /// Used before running tasks concurrently so that no namespace variable
    /// is evaluated twice.
    pub fn warm<'t>(&self, tasks: impl IntoIterator<Item = &'t Task>) -> ExecutionResult<()> {
        for task in tasks {
            self.namespace_bindings(&task.namespace, &task.name)?;
        }
        Ok(())
    }

    fn namespace_bindings(&self, namespace: &str, task: &str) -> ExecutionResult<Bindings> {
        if let Some(bindings) = self.cached(namespace) {
            return Ok(bindings);
        }

        let Some(ns) = self.taskfile.namespace(namespace) else {
            return Ok(self.seed());
        };

        let (mut bindings, include_dir) = match &ns.parent {
            Some(parent) => {
                let dir = self
                    .taskfile
                    .namespace(parent)
                    .map(|p| p.dir.as_path())
                    .unwrap_or(ns.dir.as_path());
                (self.namespace_bindings(parent, task)?, dir)
            }
            None => (self.seed(), ns.dir.as_path()),
        };

        self.apply(&mut bindings, &ns.include_vars, include_dir, task)?;
        self.apply(&mut bindings, &ns.vars, &ns.dir, task)?;
        debug!(namespace, count = bindings.values().len(), "resolved namespace variables");

        if let Ok(mut cache) = self.namespaces.lock() {
            cache.insert(namespace.to_string(), bindings.clone());
        }
        Ok(bindings)
    }

    fn cached(&self, namespace: &str) -> Option<Bindings> {
        self.namespaces
            .lock()
            .ok()
            .and_then(|cache| cache.get(namespace).cloned())
    }

    /// Built-ins and overrides, the layer every binding starts from
    fn seed(&self) -> Bindings {
        let mut bindings = Bindings::new(Arc::clone(&self.ctx.base_env));
        bindings.insert("ROOT_DIR", self.ctx.root_dir.display().to_string());
        bindings.insert("CLI_ARGS", self.ctx.cli_args.join(" "));
        for (i, arg) in self.ctx.cli_args.iter().enumerate() {
            bindings.insert(format!("ARG{}", i + 1), arg.clone());
        }
        for (name, value) in &self.ctx.overrides {
            bindings.insert(name.clone(), value.clone());
        }
        bindings
    }

    fn apply(
        &self,
        bindings: &mut Bindings,
        vars: &Declarations<VarDef>,
        dir: &Path,
        task: &str,
    ) -> ExecutionResult<()> {
        for (name, def) in vars {
            if self.ctx.overrides.contains_key(name) {
                continue;
            }
            let value = match def {
                VarDef::Literal(template) => bindings.render(template),
                VarDef::Shell { sh } => self.evaluate(bindings, name, sh, dir, task)?,
            };
            bindings.insert(name.clone(), value);
        }
        Ok(())
    }

    fn evaluate(
        &self,
        bindings: &Bindings,
        name: &str,
        sh: &str,
        dir: &Path,
        task: &str,
    ) -> ExecutionResult<String> {
        let script = bindings.render(sh);
        let env = bindings.environment();
        debug!(variable = name, script = %script, "evaluating shell variable");

        let output = ShellCommand::new(&self.ctx.interpreter, &script, dir, &env)
            .cancel(&self.ctx.cancel)
            .run()
            .map_err(|error| ExecutionError::Spawn {
                task: task.to_string(),
                stage: Stage::Resolve,
                command: script.clone(),
                error,
            })?;

        if output.state == ExitState::Cancelled {
            return Err(ExecutionError::Interrupted {
                task: Some(task.to_string()),
            });
        }
        if !output.success() {
            return Err(ExecutionError::VariableResolution {
                task: task.to_string(),
                name: name.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup(yaml: &str) -> (TempDir, Taskfile, Context) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Taskfile.yml");
        fs::write(&path, yaml).unwrap();
        let taskfile = Taskfile::load(&path).unwrap();
        let ctx = Context::for_taskfile(&taskfile).unwrap();
        (temp_dir, taskfile, ctx)
    }

    #[test]
    fn test_literal_and_shell_variables() {
        let (_dir, taskfile, ctx) = setup(
            r#"
vars:
  HOST: { sh: "echo db" }
  URL: "{{.HOST}}:5432"
tasks:
  show: { cmds: ["echo {{.URL}}"] }
"#,
        );
        let resolver = VariableResolver::new(&taskfile, &ctx);
        let bindings = resolver.resolve_task(taskfile.get("show").unwrap()).unwrap();

        assert_eq!(bindings.get("HOST"), Some("db"));
        assert_eq!(bindings.get("URL"), Some("db:5432"));
        assert_eq!(bindings.get("TASK"), Some("show"));
    }

    #[test]
    fn test_task_variables_shadow_namespace_variables() {
        let (_dir, taskfile, ctx) = setup(
            r#"
vars:
  MODE: debug
  LABEL: "{{.MODE}}"
tasks:
  release:
    vars:
      MODE: release
      TAG: "{{.MODE}}-{{.LABEL}}"
"#,
        );
        let resolver = VariableResolver::new(&taskfile, &ctx);
        let bindings = resolver.resolve_task(taskfile.get("release").unwrap()).unwrap();

        assert_eq!(bindings.get("MODE"), Some("release"));
        assert_eq!(bindings.get("TAG"), Some("release-debug"));
    }

    #[test]
    fn test_self_reference_reads_outer_layer() {
        let (_dir, taskfile, ctx) = setup(
            r#"
vars:
  SEARCH: /usr/bin
tasks:
  t:
    vars:
      SEARCH: "{{.SEARCH}}:/opt/bin"
"#,
        );
        let resolver = VariableResolver::new(&taskfile, &ctx);
        let bindings = resolver.resolve_task(taskfile.get("t").unwrap()).unwrap();

        assert_eq!(bindings.get("SEARCH"), Some("/usr/bin:/opt/bin"));
    }

    #[test]
    fn test_override_is_never_evaluated() {
        let (_dir, taskfile, ctx) = setup(
            r#"
vars:
  TOKEN: { sh: "exit 1" }
  HEADER: "Bearer {{.TOKEN}}"
tasks:
  t: {}
"#,
        );
        let mut overrides = IndexMap::new();
        overrides.insert("TOKEN".to_string(), "abc".to_string());
        let ctx = ctx.with_overrides(overrides);

        let resolver = VariableResolver::new(&taskfile, &ctx);
        let bindings = resolver.resolve_task(taskfile.get("t").unwrap()).unwrap();

        assert_eq!(bindings.get("TOKEN"), Some("abc"));
        assert_eq!(bindings.get("HEADER"), Some("Bearer abc"));
    }

    #[test]
    fn test_failing_shell_variable() {
        let (_dir, taskfile, ctx) = setup(
            r#"
tasks:
  t:
    vars:
      VERSION: { sh: "echo no tags >&2; exit 1" }
"#,
        );
        let resolver = VariableResolver::new(&taskfile, &ctx);
        let result = resolver.resolve_task(taskfile.get("t").unwrap());

        match result {
            Err(ExecutionError::VariableResolution { task, name, stderr }) => {
                assert_eq!(task, "t");
                assert_eq!(name, "VERSION");
                assert_eq!(stderr, "no tags");
            }
            other => panic!("expected resolution error, got {:?}", other),
        }
    }

    #[test]
    fn test_builtin_variables() {
        let (dir, taskfile, ctx) = setup("tasks:\n  t: {}\n");
        let ctx = ctx.with_cli_args(vec!["one".to_string(), "two words".to_string()]);
        let resolver = VariableResolver::new(&taskfile, &ctx);
        let bindings = resolver.resolve_task(taskfile.get("t").unwrap()).unwrap();

        assert_eq!(bindings.get("CLI_ARGS"), Some("one two words"));
        assert_eq!(bindings.get("ARG1"), Some("one"));
        assert_eq!(bindings.get("ARG2"), Some("two words"));
        assert_eq!(
            bindings.get("ROOT_DIR").map(str::to_string),
            Some(dir.path().display().to_string())
        );
    }

    #[test]
    fn test_include_layers_and_single_evaluation() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(
            root.join("Taskfile.yml"),
            r#"
vars:
  REGION: eu
includes:
  db:
    taskfile: db.yml
    vars:
      PORT: "5432"
tasks: {}
"#,
        )
        .unwrap();
        fs::write(
            root.join("db.yml"),
            r#"
vars:
  STAMP: { sh: "echo x >> counter; echo stamped" }
  DSN: "{{.REGION}}:{{.PORT}}"
tasks:
  up: {}
  down: {}
"#,
        )
        .unwrap();

        let taskfile = Taskfile::load(&root.join("Taskfile.yml")).unwrap();
        let ctx = Context::for_taskfile(&taskfile).unwrap();
        let resolver = VariableResolver::new(&taskfile, &ctx);

        let up = resolver.resolve_task(taskfile.get("db:up").unwrap()).unwrap();
        let down = resolver.resolve_task(taskfile.get("db:down").unwrap()).unwrap();

        assert_eq!(up.get("DSN"), Some("eu:5432"));
        assert_eq!(down.get("STAMP"), Some("stamped"));
        assert_eq!(down.get("TASK"), Some("db:down"));
        let counter = fs::read_to_string(root.join("counter")).unwrap();
        assert_eq!(counter.lines().count(), 1);
    }

    #[test]
    fn test_environment_includes_bindings() {
        let mut base = HashMap::new();
        base.insert("HOME".to_string(), "/home/me".to_string());
        let mut bindings = Bindings::new(Arc::new(base));
        bindings.insert("HOST", "db");

        let env = bindings.environment();
        assert_eq!(env.get("HOME").map(String::as_str), Some("/home/me"));
        assert_eq!(env.get("HOST").map(String::as_str), Some("db"));
        assert_eq!(bindings.render("{{.HOME}}/{{.HOST}}"), "/home/me/db");
    }
}
