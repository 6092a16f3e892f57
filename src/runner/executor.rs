//! Task execution
//!
//! Each task goes through the same pipeline: resolve variables, check
//! preconditions, check whether it is up to date, then run its commands.
//! The plan stops at the first task that fails.

use crate::config::EnvScope;
use crate::error::{ExecutionError, ExecutionResult, Stage};
use crate::runner::command::{ExitState, ShellCommand};
use crate::runner::context::{Context, Verbosity};
use crate::runner::output::{Stream, TaskOutput};
use crate::runner::plan::ExecutionPlan;
use crate::runner::probe::{check_preconditions, check_status};
use crate::runner::sources::is_up_to_date;
use crate::runner::task::Task;
use crate::runner::taskfile::Taskfile;
use crate::runner::vars::{Bindings, VariableResolver};
use colored::Colorize;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a single task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Up to date; the body did not run
    Skipped,
    Succeeded,
    Failed {
        /// 1-based index of the failing command
        index: usize,
        command: String,
        /// `None` when the command was killed
        exit_code: Option<i32>,
        /// Combined stdout and stderr of the failing command
        output: String,
        /// Set when the command was killed for exceeding this limit
        timeout: Option<Duration>,
    },
    PreconditionFailed {
        message: String,
    },
}

impl TaskOutcome {
    fn to_error(&self, task: &str) -> Option<ExecutionError> {
        match self {
            TaskOutcome::Failed {
                index,
                command,
                timeout: Some(timeout),
                ..
            } => Some(ExecutionError::Timeout {
                task: task.to_string(),
                index: *index,
                command: command.clone(),
                timeout: *timeout,
            }),
            TaskOutcome::Failed {
                index,
                command,
                exit_code,
                output,
                timeout: None,
            } => Some(ExecutionError::CommandFailed {
                task: task.to_string(),
                index: *index,
                command: command.clone(),
                exit_code: *exit_code,
                output: output.clone(),
            }),
            TaskOutcome::PreconditionFailed { message } => Some(ExecutionError::PreconditionFailed {
                task: task.to_string(),
                message: message.clone(),
            }),
            TaskOutcome::Skipped | TaskOutcome::Succeeded => None,
        }
    }
}

/// Outcome of one task of the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub task: String,
    pub outcome: TaskOutcome,
}

/// Results of running a plan
#[derive(Debug, Default)]
pub struct RunReport {
    /// Tasks that ran, in plan order
    pub results: Vec<TaskResult>,
    error: Option<ExecutionError>,
}

impl RunReport {
    /// Whether every task succeeded or was skipped
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Outcome of `task`, if it ran
    pub fn outcome(&self, task: &str) -> Option<&TaskOutcome> {
        self.results
            .iter()
            .find(|r| r.task == task)
            .map(|r| &r.outcome)
    }

    /// The error that stopped the plan
    pub fn error(&self) -> Option<&ExecutionError> {
        self.error.as_ref()
    }

    pub fn into_result(self) -> ExecutionResult<Vec<TaskResult>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.results),
        }
    }

    /// Record a task; returns false when the plan must stop
    fn record(&mut self, task: &str, result: ExecutionResult<TaskOutcome>) -> bool {
        match result {
            Ok(outcome) => {
                let error = outcome.to_error(task);
                self.results.push(TaskResult {
                    task: task.to_string(),
                    outcome,
                });
                match error {
                    Some(error) => {
                        self.error.get_or_insert(error);
                        false
                    }
                    None => true,
                }
            }
            Err(error) => {
                self.error.get_or_insert(error);
                false
            }
        }
    }
}

/// Runs execution plans against one taskfile
pub struct Executor<'a> {
    taskfile: &'a Taskfile,
    ctx: &'a Context,
    resolver: VariableResolver<'a>,
}

impl<'a> Executor<'a> {
    pub fn new(taskfile: &'a Taskfile, ctx: &'a Context) -> Self {
        Executor {
            taskfile,
            ctx,
            resolver: VariableResolver::new(taskfile, ctx),
        }
    }

    /// Plan and run the task named `reference`
    pub fn run(&self, reference: &str) -> crate::Result<RunReport> {
        let plan = ExecutionPlan::build(self.taskfile, reference)?;
        Ok(self.run_plan(&plan))
    }

    /// Run every task of `plan`, stopping at the first failure
    pub fn run_plan(&self, plan: &ExecutionPlan) -> RunReport {
        info!(task = plan.root(), tasks = plan.len(), parallel = self.ctx.parallel, "running plan");
        if self.ctx.parallel {
            self.run_levels(plan)
        } else {
            self.run_sequential(plan)
        }
    }

    fn run_sequential(&self, plan: &ExecutionPlan) -> RunReport {
        let mut report = RunReport::default();
        let output = TaskOutput::live();

        for task in plan.tasks().iter().filter_map(|name| self.taskfile.get(name)) {
            if self.ctx.cancel.is_cancelled() {
                report.record(&task.name, Err(ExecutionError::Interrupted { task: None }));
                break;
            }
            if !report.record(&task.name, self.run_task(task, &output)) {
                break;
            }
        }
        report
    }

    fn run_levels(&self, plan: &ExecutionPlan) -> RunReport {
        let mut report = RunReport::default();

        // Namespace variables are shared; evaluate them once up front
        let tasks: Vec<&Task> = plan
            .tasks()
            .iter()
            .filter_map(|name| self.taskfile.get(name))
            .collect();
        if let Err(error) = self.resolver.warm(tasks.iter().copied()) {
            report.record(plan.root(), Err(error));
            return report;
        }

        for level in plan.levels() {
            if self.ctx.cancel.is_cancelled() {
                report.record(plan.root(), Err(ExecutionError::Interrupted { task: None }));
                break;
            }
            debug!(tasks = ?level, "starting level");

            let level: Vec<&Task> = level
                .iter()
                .filter_map(|name| self.taskfile.get(name))
                .collect();
            let finished: Vec<(TaskOutput, ExecutionResult<TaskOutcome>)> = thread::scope(|scope| {
                let handles: Vec<_> = level
                    .iter()
                    .map(|&task| {
                        scope.spawn(move || {
                            let output = TaskOutput::buffered();
                            let result = self.run_task(task, &output);
                            (output, result)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect()
            });

            let mut keep_going = true;
            for (task, (output, result)) in level.iter().zip(finished) {
                output.flush();
                keep_going &= report.record(&task.name, result);
            }
            if !keep_going {
                break;
            }
        }
        report
    }

    /// Run one task through the whole pipeline
    pub fn run_task(&self, task: &Task, output: &TaskOutput) -> ExecutionResult<TaskOutcome> {
        self.notice(output, &format!("task: {}", task.name.bold()));

        let bindings = self.resolver.resolve_task(task)?;
        if self.ctx.verbosity >= Verbosity::Verbose {
            for (name, value) in bindings.values() {
                output.line(
                    Stream::Stderr,
                    &format!("{} {} = {}", "[DEBUG]".dimmed(), name, value),
                );
            }
        }

        if self.ctx.dry_run {
            return self.dry_run(task, &bindings, output);
        }

        if let Some(message) = check_preconditions(task, &bindings, self.ctx)? {
            warn!(task = %task.name, %message, "precondition failed");
            return Ok(TaskOutcome::PreconditionFailed { message });
        }

        if !self.ctx.force && self.up_to_date(task, &bindings)? {
            self.notice(output, &format!("Task \"{}\" is up to date", task.name));
            return Ok(TaskOutcome::Skipped);
        }

        self.execute(task, &bindings, output)
    }

    /// Status probes and sources must all agree before a task is skipped
    fn up_to_date(&self, task: &Task, bindings: &Bindings) -> ExecutionResult<bool> {
        if !task.has_up_to_date_checks() {
            return Ok(false);
        }
        if !task.status.is_empty() && !check_status(task, bindings, self.ctx)? {
            return Ok(false);
        }
        if !task.sources.is_empty() {
            let sources: Vec<String> = task.sources.iter().map(|s| bindings.render(s)).collect();
            let generates: Vec<String> = task.generates.iter().map(|s| bindings.render(s)).collect();
            if !is_up_to_date(&task.dir, &sources, &generates) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn execute(
        &self,
        task: &Task,
        bindings: &Bindings,
        output: &TaskOutput,
    ) -> ExecutionResult<TaskOutcome> {
        let mut shared_env = bindings.environment();

        for (i, cmd) in task.cmds.iter().enumerate() {
            let index = i + 1;
            let script = bindings.render(&cmd.cmd);
            let entries = cmd.env.iter().map(|(k, v)| (k.clone(), bindings.render(v)));

            let isolated_env: HashMap<String, String>;
            let env = match task.env_scope {
                EnvScope::Shared => {
                    shared_env.extend(entries);
                    &shared_env
                }
                EnvScope::Isolated => {
                    let mut env = shared_env.clone();
                    env.extend(entries);
                    isolated_env = env;
                    &isolated_env
                }
            };

            let dir = match &cmd.dir {
                Some(dir) => task.dir.join(bindings.render(dir)),
                None => task.dir.clone(),
            };

            if !task.silent && !cmd.silent {
                self.announce(output, &script);
            }

            let mut shell = ShellCommand::new(&self.ctx.interpreter, &script, &dir, env)
                .timeout(task.timeout)
                .cancel(&self.ctx.cancel);
            if self.ctx.shows_output() {
                shell = shell.echo(output);
            }

            let result = shell.run().map_err(|error| ExecutionError::Spawn {
                task: task.name.clone(),
                stage: Stage::Execute,
                command: script.clone(),
                error,
            })?;

            let timeout = match result.state {
                ExitState::Exited(Some(0)) => continue,
                ExitState::Cancelled => {
                    return Err(ExecutionError::Interrupted {
                        task: Some(task.name.clone()),
                    })
                }
                ExitState::TimedOut => task.timeout,
                ExitState::Exited(_) => None,
            };

            if cmd.ignore_error {
                debug!(task = %task.name, index, state = ?result.state, "ignoring command failure");
                continue;
            }

            return Ok(TaskOutcome::Failed {
                index,
                command: script,
                exit_code: result.code(),
                output: result.combined,
                timeout,
            });
        }

        Ok(TaskOutcome::Succeeded)
    }

    fn dry_run(
        &self,
        task: &Task,
        bindings: &Bindings,
        output: &TaskOutput,
    ) -> ExecutionResult<TaskOutcome> {
        for cmd in &task.cmds {
            self.announce(output, &bindings.render(&cmd.cmd));
        }
        Ok(TaskOutcome::Succeeded)
    }

    fn announce(&self, output: &TaskOutput, script: &str) {
        if self.ctx.shows_progress() {
            output.line(Stream::Stderr, &format!("{} {}", "[RUN]".cyan(), script));
        }
    }

    fn notice(&self, output: &TaskOutput, message: &str) {
        if self.ctx.shows_progress() {
            output.line(Stream::Stderr, &format!("{} {}", "[INFO]".green(), message));
        }
    }
}
