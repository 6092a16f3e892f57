//! Main CLI application

use crate::config::find_config_file;
use crate::error::{Result, TaskgraphError, EXIT_FAILURE, OUTPUT_TAIL_LINES};
use crate::logging::init_logging;
use crate::runner::{CancelToken, Context, ExecutionPlan, Executor, Taskfile, Verbosity};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use colored::Colorize;
use indexmap::IndexMap;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

/// Build the clap command
pub fn build_cli() -> Command {
    Command::new("taskgraph")
        .version(crate::VERSION)
        .about("Run tasks from a YAML task graph")
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the Taskfile (default: search upwards from the current directory)")
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print command output and errors")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Print no output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Run a task and its dependencies")
                .arg(
                    Arg::new("task")
                        .value_name("TASK")
                        .help("Task name, optionally namespaced (ns:task)")
                        .required(true),
                )
                .arg(
                    Arg::new("parallel")
                        .short('p')
                        .long("parallel")
                        .help("Run independent dependencies concurrently")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .help("Run tasks even when they are up to date")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("dry-run")
                        .short('n')
                        .long("dry-run")
                        .help("Print commands without running them")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("var")
                        .long("var")
                        .value_name("KEY=VALUE")
                        .help("Override a variable")
                        .value_parser(parse_var)
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("args")
                        .value_name("ARGS")
                        .help("Arguments passed to the task as CLI_ARGS and ARG1..n")
                        .num_args(0..)
                        .last(true)
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(
            Command::new("list").about("List available tasks").arg(
                Arg::new("all")
                    .short('a')
                    .long("all")
                    .help("Include private tasks")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(
            Command::new("graph")
                .about("Show the execution plan of a task")
                .arg(Arg::new("task").value_name("TASK").required(true)),
        )
        .subcommand(
            Command::new("completion")
                .about("Generate a shell completion script")
                .arg(
                    Arg::new("shell")
                        .value_name("SHELL")
                        .value_parser(value_parser!(Shell))
                        .required(true),
                ),
        )
}

/// Run the CLI with the process arguments; returns the exit code
pub fn run() -> i32 {
    run_from(std::env::args_os())
}

/// Run the CLI with explicit arguments; returns the exit code
pub fn run_from<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut command = build_cli();
    let matches = match command.try_get_matches_from_mut(args) {
        Ok(matches) => matches,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { EXIT_FAILURE } else { 0 };
        }
    };

    let verbosity = get_verbosity(&matches);
    if let Err(e) = init_logging(verbosity == Verbosity::Verbose) {
        eprintln!("{} {}", "[WARN]".yellow(), e);
    }

    match dispatch(&mut command, &matches, verbosity) {
        Ok(()) => 0,
        Err(e) => {
            report_error(&e, verbosity);
            e.exit_code()
        }
    }
}

fn dispatch(command: &mut Command, matches: &ArgMatches, verbosity: Verbosity) -> Result<()> {
    let Some((name, sub)) = matches.subcommand() else {
        command.print_help()?;
        println!();
        return Ok(());
    };

    if name == "completion" {
        if let Some(shell) = sub.get_one::<Shell>("shell") {
            clap_complete::generate(*shell, command, "taskgraph", &mut io::stdout());
        }
        return Ok(());
    }

    let taskfile = load_taskfile(matches)?;
    match name {
        "run" => run_task(&taskfile, sub, verbosity),
        "list" => {
            list_tasks(&taskfile, sub.get_flag("all"));
            Ok(())
        }
        "graph" => {
            let task = sub.get_one::<String>("task").map(String::as_str).unwrap_or_default();
            show_graph(&taskfile, task)
        }
        _ => Ok(()),
    }
}

fn load_taskfile(matches: &ArgMatches) -> Result<Taskfile> {
    let path = match matches.get_one::<PathBuf>("file") {
        Some(path) => path.clone(),
        None => find_config_file()?,
    };
    tracing::debug!(path = %path.display(), "loading taskfile");
    Ok(Taskfile::load(&path)?)
}

fn run_task(taskfile: &Taskfile, matches: &ArgMatches, verbosity: Verbosity) -> Result<()> {
    let task = matches.get_one::<String>("task").map(String::as_str).unwrap_or_default();
    let overrides: IndexMap<String, String> = matches
        .get_many::<(String, String)>("var")
        .map(|vars| vars.cloned().collect())
        .unwrap_or_default();
    let cli_args: Vec<String> = matches
        .get_many::<String>("args")
        .map(|args| args.cloned().collect())
        .unwrap_or_default();

    let cancel = CancelToken::new();
    if let Err(e) = cancel.install_handler() {
        tracing::warn!(error = %e, "could not install interrupt handler");
    }

    let ctx = Context::for_taskfile(taskfile)?
        .with_verbosity(verbosity)
        .with_overrides(overrides)
        .with_cli_args(cli_args)
        .with_force(matches.get_flag("force"))
        .with_dry_run(matches.get_flag("dry-run"))
        .with_parallel(matches.get_flag("parallel"))
        .with_cancel(cancel);

    let report = Executor::new(taskfile, &ctx).run(task)?;
    report.into_result()?;
    Ok(())
}

fn list_tasks(taskfile: &Taskfile, all: bool) {
    let mut tasks: Vec<_> = taskfile.tasks().filter(|t| all || !t.private).collect();
    tasks.sort_by(|a, b| a.name.cmp(&b.name));

    if tasks.is_empty() {
        eprintln!("No tasks defined in {}", taskfile.path.display());
        return;
    }

    let width = tasks.iter().map(|t| t.name.len()).max().unwrap_or(0);
    println!("{}", "Available tasks:".bold());
    for task in tasks {
        let mut line = format!("  {}", format!("{:<width$}", task.name, width = width).green());
        if let Some(desc) = &task.desc {
            line.push_str(&format!("  {}", desc));
        }
        if !task.aliases.is_empty() {
            line.push_str(&format!(" (aliases: {})", task.aliases.join(", ")).dimmed().to_string());
        }
        if task.private {
            line.push_str(&" [private]".dimmed().to_string());
        }
        println!("{}", line.trim_end());
    }
}

fn show_graph(taskfile: &Taskfile, reference: &str) -> Result<()> {
    let plan = ExecutionPlan::build(taskfile, reference)?;
    println!("Execution plan for '{}':", plan.root());
    for (level, names) in plan.levels().iter().enumerate() {
        println!("level {}:", level);
        for name in names {
            let deps = taskfile.get(name).map(|t| t.deps.as_slice()).unwrap_or_default();
            if deps.is_empty() {
                println!("  {}", name);
            } else {
                println!("  {} <- {}", name, deps.join(", "));
            }
        }
    }
    Ok(())
}

fn report_error(error: &TaskgraphError, verbosity: Verbosity) {
    if verbosity == Verbosity::Silent {
        return;
    }
    // Execution errors carry their stage in the message already
    let message = match (error, error.stage()) {
        (TaskgraphError::Plan(_), Some(stage)) => format!("{}: {}", stage, error),
        _ => error.to_string(),
    };
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
    if let Some(tail) = error.output_tail().filter(|t| !t.is_empty()) {
        eprintln!("{}", format!("--- last {} lines of output ---", OUTPUT_TAIL_LINES).dimmed());
        eprintln!("{}", tail);
    }
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Parse a `KEY=VALUE` override
fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}
