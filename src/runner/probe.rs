//! Precondition and status probes
//!
//! Probes are shell commands whose exit code is the answer. Their output is
//! captured and discarded.

use crate::error::{ExecutionError, ExecutionResult, Stage};
use crate::runner::command::{ExitState, ShellCommand};
use crate::runner::context::Context;
use crate::runner::task::{Probe, Task};
use crate::runner::vars::Bindings;
use std::collections::HashMap;
use tracing::debug;

/// Run the preconditions of `task` in order
///
/// Returns the failure message of the first probe that fails, or `None` when
/// all of them pass.
pub fn check_preconditions(
    task: &Task,
    bindings: &Bindings,
    ctx: &Context,
) -> ExecutionResult<Option<String>> {
    let env = bindings.environment();
    for probe in &task.preconditions {
        let script = bindings.render(&probe.sh);
        if !run_probe(task, &script, &env, ctx, Stage::Precondition)? {
            return Ok(Some(failure_message(probe, &script, bindings)));
        }
    }
    Ok(None)
}

/// Whether every status probe of `task` passes
///
/// A task without status probes is never up to date on this basis.
pub fn check_status(task: &Task, bindings: &Bindings, ctx: &Context) -> ExecutionResult<bool> {
    if task.status.is_empty() {
        return Ok(false);
    }
    let env = bindings.environment();
    for probe in &task.status {
        let script = bindings.render(&probe.sh);
        if !run_probe(task, &script, &env, ctx, Stage::Status)? {
            debug!(task = %task.name, probe = %script, "status probe failed");
            return Ok(false);
        }
    }
    Ok(true)
}

fn failure_message(probe: &Probe, script: &str, bindings: &Bindings) -> String {
    match &probe.msg {
        Some(msg) => bindings.render(msg),
        None => format!("precondition not met: {}", script),
    }
}

fn run_probe(
    task: &Task,
    script: &str,
    env: &HashMap<String, String>,
    ctx: &Context,
    stage: Stage,
) -> ExecutionResult<bool> {
    let output = ShellCommand::new(&ctx.interpreter, script, &task.dir, env)
        .cancel(&ctx.cancel)
        .run()
        .map_err(|error| ExecutionError::Spawn {
            task: task.name.clone(),
            stage,
            command: script.to_string(),
            error,
        })?;

    if output.state == ExitState::Cancelled {
        return Err(ExecutionError::Interrupted {
            task: Some(task.name.clone()),
        });
    }
    Ok(output.success())
}
