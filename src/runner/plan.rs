//! Dependency graph resolution
//!
//! Expands a requested task into its transitive dependency closure, ordered
//! so every task comes after all of its dependencies. Cycles are reported
//! here, before any subprocess runs.

use crate::error::{PlanError, PlanResult};
use crate::runner::taskfile::Taskfile;
use std::collections::HashMap;

/// Ordered tasks for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    order: Vec<String>,
    levels: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

struct Walk<'t> {
    taskfile: &'t Taskfile,
    marks: HashMap<&'t str, Mark>,
    levels: HashMap<&'t str, usize>,
    path: Vec<&'t str>,
    order: Vec<&'t str>,
}

impl<'t> Walk<'t> {
    /// Depth-first visit; returns the level of `name`
    fn visit(&mut self, name: &'t str) -> PlanResult<usize> {
        match self.marks.get(name) {
            Some(Mark::Done) => return Ok(self.levels.get(name).copied().unwrap_or(0)),
            Some(Mark::InProgress) => {
                let start = self.path.iter().position(|n| *n == name).unwrap_or(0);
                return Err(PlanError::CycleDetected {
                    cycle: self.path[start..].iter().map(|n| n.to_string()).collect(),
                });
            }
            None => {}
        }

        let taskfile = self.taskfile;
        let task = taskfile.get(name).ok_or_else(|| PlanError::UnknownTask {
            name: name.to_string(),
            suggestions: taskfile.suggest(name),
        })?;

        self.marks.insert(name, Mark::InProgress);
        self.path.push(name);

        let mut level = 0;
        for dep in &task.deps {
            level = level.max(self.visit(dep)? + 1);
        }

        self.path.pop();
        self.marks.insert(name, Mark::Done);
        self.levels.insert(name, level);
        self.order.push(name);
        Ok(level)
    }
}

impl ExecutionPlan {
    /// Plan the task named `reference` (qualified name or alias)
    pub fn build(taskfile: &Taskfile, reference: &str) -> PlanResult<Self> {
        let root = taskfile
            .lookup(reference)
            .ok_or_else(|| PlanError::UnknownTask {
                name: reference.to_string(),
                suggestions: taskfile.suggest(reference),
            })?;
        if root.private {
            return Err(PlanError::PrivateTask(root.name.clone()));
        }

        let mut walk = Walk {
            taskfile,
            marks: HashMap::new(),
            levels: HashMap::new(),
            path: Vec::new(),
            order: Vec::new(),
        };
        walk.visit(&root.name)?;

        let levels = walk.order.iter().map(|name| walk.levels[name]).collect();
        Ok(ExecutionPlan {
            order: walk.order.into_iter().map(str::to_string).collect(),
            levels,
        })
    }

    /// Task names in execution order
    pub fn tasks(&self) -> &[String] {
        &self.order
    }

    /// The requested task (always last)
    pub fn root(&self) -> &str {
        self.order.last().map(String::as_str).unwrap_or_default()
    }

    /// Level of each task, parallel to [`ExecutionPlan::tasks`]
    pub fn level_of(&self, name: &str) -> Option<usize> {
        self.order
            .iter()
            .position(|n| n == name)
            .map(|i| self.levels[i])
    }

    /// Tasks grouped by level, each group in plan order
    ///
    /// Tasks within a group do not depend on each other.
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let depth = self.levels.iter().max().map_or(0, |max| max + 1);
        let mut groups: Vec<Vec<&str>> = vec![Vec::new(); depth];
        for (name, level) in self.order.iter().zip(&self.levels) {
            groups[*level].push(name);
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
