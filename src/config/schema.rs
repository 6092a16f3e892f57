//! Configuration validation
//!
//! Structural checks that only need a single document: duplicate names,
//! forward-referenced variables, timeouts and glob patterns. Checks that need
//! the whole namespace tree (dependency references) happen when the tree is
//! built in `runner::taskfile`.

use crate::config::types::{Config, Declarations, Task, VarDef};
use crate::error::{ConfigError, ConfigResult};
use crate::runner::interpolate::placeholder_names;
use std::collections::HashSet;
use std::time::Duration;

/// Validate one document belonging to `namespace` ("" for the root)
pub fn validate_config(config: &Config, namespace: &str) -> ConfigResult<()> {
    let label = namespace_label(namespace);

    if let Some(interpreter) = &config.interpreter {
        if interpreter.is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter must name at least one program".to_string(),
            ));
        }
    }

    let mut includes = HashSet::new();
    for (alias, _) in &config.includes {
        if !includes.insert(alias.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Include '{}' is declared more than once in {}",
                alias, label
            )));
        }
    }

    validate_variables(&label, &config.vars)?;

    let mut names = HashSet::new();
    for (name, task) in &config.tasks {
        if name.is_empty() || name.contains(':') {
            return Err(ConfigError::Invalid(format!(
                "Task name '{}' must be non-empty and cannot contain ':'",
                name
            )));
        }
        if !names.insert(name.as_str()) {
            return Err(ConfigError::DuplicateTask {
                namespace: label.clone(),
                name: name.clone(),
            });
        }
        validate_task(name, task)?;
    }

    let mut aliases = HashSet::new();
    for (name, task) in &config.tasks {
        for alias in &task.aliases {
            if alias.contains(':') || names.contains(alias.as_str()) || !aliases.insert(alias.as_str()) {
                return Err(ConfigError::DuplicateAlias {
                    namespace: label.clone(),
                    alias: alias.clone(),
                });
            }
        }
        if task.aliases.iter().any(|a| a == name) {
            return Err(ConfigError::DuplicateAlias {
                namespace: label.clone(),
                alias: name.clone(),
            });
        }
    }

    Ok(())
}

/// Validate a single task
pub fn validate_task(name: &str, task: &Task) -> ConfigResult<()> {
    validate_variables(&format!("task '{}'", name), &task.vars)?;

    if let Some(timeout) = &task.timeout {
        parse_timeout(name, timeout)?;
    }

    for pattern in task.sources.iter().chain(task.generates.iter()) {
        validate_pattern(name, pattern)?;
    }

    if !task.generates.is_empty() && task.sources.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "Task '{}' declares generates without sources",
            name
        )));
    }

    Ok(())
}

/// Reject duplicate names and references to variables declared later in the scope
pub fn validate_variables(scope: &str, vars: &Declarations<VarDef>) -> ConfigResult<()> {
    for (index, (name, def)) in vars.iter().enumerate() {
        if vars[..index].iter().any(|(earlier, _)| earlier == name) {
            return Err(ConfigError::Invalid(format!(
                "Variable '{}' is declared more than once in {}",
                name, scope
            )));
        }

        for referenced in placeholder_names(def.template()) {
            if referenced == *name {
                continue;
            }
            if vars[index + 1..].iter().any(|(later, _)| *later == referenced) {
                return Err(ConfigError::ForwardReference {
                    scope: scope.to_string(),
                    name: name.clone(),
                    referenced,
                });
            }
        }
    }
    Ok(())
}

/// Parse a humantime duration such as "30s" or "1h30m"
pub fn parse_timeout(task: &str, value: &str) -> ConfigResult<Duration> {
    value
        .trim()
        .parse::<humantime::Duration>()
        .map(Duration::from)
        .map_err(|e| ConfigError::InvalidTimeout {
            task: task.to_string(),
            value: value.to_string(),
            error: e.to_string(),
        })
}

/// Check a sources/generates glob pattern
fn validate_pattern(task: &str, pattern: &str) -> ConfigResult<()> {
    glob::Pattern::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidGlob {
            task: task.to_string(),
            pattern: pattern.to_string(),
            error: e.to_string(),
        })
}

/// Human-readable name of a namespace for error messages
pub fn namespace_label(namespace: &str) -> String {
    if namespace.is_empty() {
        "the root namespace".to_string()
    } else {
        format!("namespace '{}'", namespace)
    }
}
