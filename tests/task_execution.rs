//! Integration tests for task execution

mod common;

use common::{load_taskfile, read_file, silent_context, write_file};
use taskgraph::error::{ExecutionError, PlanError, TaskgraphError};
use taskgraph::runner::{ExecutionPlan, Executor, TaskOutcome, TaskResult, Taskfile};

fn outcomes(results: &[TaskResult]) -> Vec<(&str, &TaskOutcome)> {
    results
        .iter()
        .map(|r| (r.task.as_str(), &r.outcome))
        .collect()
}

#[test]
fn test_marker_file_makes_dependency_idempotent() {
    let (dir, taskfile) = load_taskfile(
        r#"
tasks:
  B:
    status: ["test -f marker"]
    cmds: ["touch marker", "echo b >> runs"]
  A:
    deps: [B]
    cmds: ["echo a >> runs"]
"#,
    );
    let ctx = silent_context(&taskfile);

    let first = Executor::new(&taskfile, &ctx).run("A").unwrap();
    assert_eq!(
        outcomes(&first.results),
        vec![("B", &TaskOutcome::Succeeded), ("A", &TaskOutcome::Succeeded)]
    );

    let second = Executor::new(&taskfile, &ctx).run("A").unwrap();
    assert_eq!(
        outcomes(&second.results),
        vec![("B", &TaskOutcome::Skipped), ("A", &TaskOutcome::Succeeded)]
    );
    assert_eq!(read_file(dir.path(), "runs"), "b\na\na\n");
}

#[test]
fn test_exit_code_passes_through_and_plan_stops() {
    let (dir, taskfile) = load_taskfile(
        r#"
tasks:
  X:
    cmds: ["echo going down; exit 3"]
  after:
    deps: [X]
    cmds: [touch after-ran]
"#,
    );
    let ctx = silent_context(&taskfile);
    let report = Executor::new(&taskfile, &ctx).run("after").unwrap();

    assert_eq!(report.results.len(), 1);
    match report.outcome("X") {
        Some(TaskOutcome::Failed {
            index,
            exit_code,
            output,
            ..
        }) => {
            assert_eq!(*index, 1);
            assert_eq!(*exit_code, Some(3));
            assert!(output.contains("going down"));
        }
        other => panic!("expected X to fail, got {:?}", other),
    }
    assert!(!dir.path().join("after-ran").exists());

    let err = TaskgraphError::from(report.into_result().unwrap_err());
    assert_eq!(err.exit_code(), 3);
    assert!(err.output_tail().unwrap().contains("going down"));
}

#[test]
fn test_namespace_and_task_variables() {
    let (dir, taskfile) = load_taskfile(
        r#"
vars:
  HOST: db
tasks:
  connect:
    vars:
      URL: "{{.HOST}}:5432"
    cmds: ["printf '%s %s' '{{.HOST}}' \"$URL\" > url"]
"#,
    );
    let ctx = silent_context(&taskfile);
    Executor::new(&taskfile, &ctx).run("connect").unwrap().into_result().unwrap();

    assert_eq!(read_file(dir.path(), "url"), "db db:5432");
}

#[test]
fn test_cycle_launches_no_subprocess() {
    let (dir, taskfile) = load_taskfile(
        r#"
tasks:
  a: { deps: [b], cmds: [touch a-ran] }
  b: { deps: [c], cmds: [touch b-ran] }
  c: { deps: [a], cmds: [touch c-ran] }
"#,
    );
    let ctx = silent_context(&taskfile);

    match Executor::new(&taskfile, &ctx).run("a") {
        Err(TaskgraphError::Plan(PlanError::CycleDetected { cycle })) => {
            assert_eq!(cycle, vec!["a", "b", "c"]);
        }
        other => panic!("expected cycle, got {:?}", other),
    }
    for marker in ["a-ran", "b-ran", "c-ran"] {
        assert!(!dir.path().join(marker).exists());
    }
}

#[test]
fn test_failed_precondition_blocks_task_and_dependents() {
    let (dir, taskfile) = load_taskfile(
        r#"
tasks:
  keys:
    preconditions:
      - sh: test -f age.key
        msg: "Age key missing: run keygen first"
    cmds: [touch keys-ran]
  deploy:
    deps: [keys]
    cmds: [touch deploy-ran]
"#,
    );
    let ctx = silent_context(&taskfile);
    let report = Executor::new(&taskfile, &ctx).run("deploy").unwrap();

    assert_eq!(
        report.outcome("keys"),
        Some(&TaskOutcome::PreconditionFailed {
            message: "Age key missing: run keygen first".to_string()
        })
    );
    assert!(report.outcome("deploy").is_none());
    assert!(!dir.path().join("keys-ran").exists());
    assert!(!dir.path().join("deploy-ran").exists());

    match report.into_result() {
        Err(err @ ExecutionError::PreconditionFailed { .. }) => assert_eq!(err.exit_code(), 2),
        other => panic!("expected precondition failure, got {:?}", other),
    }
}

#[test]
fn test_empty_status_never_skips() {
    let (dir, taskfile) = load_taskfile("tasks:\n  t: { cmds: [\"echo run >> runs\"] }\n");
    let ctx = silent_context(&taskfile);

    for _ in 0..3 {
        let report = Executor::new(&taskfile, &ctx).run("t").unwrap();
        assert_eq!(report.outcome("t"), Some(&TaskOutcome::Succeeded));
    }
    assert_eq!(read_file(dir.path(), "runs").lines().count(), 3);
}

#[test]
fn test_rerun_of_idempotent_plan_skips_everything() {
    let (_dir, taskfile) = load_taskfile(
        r#"
tasks:
  network:
    status: ["test -f network"]
    cmds: [touch network]
  volume:
    status: ["test -f volume"]
    cmds: [touch volume]
  up:
    deps: [network, volume]
    status: ["test -f up"]
    cmds: [touch up]
"#,
    );
    let ctx = silent_context(&taskfile);
    Executor::new(&taskfile, &ctx).run("up").unwrap().into_result().unwrap();

    let report = Executor::new(&taskfile, &ctx).run("up").unwrap();
    assert!(report
        .results
        .iter()
        .all(|r| r.outcome == TaskOutcome::Skipped));
    assert_eq!(report.results.len(), 3);
}

#[test]
fn test_each_dependency_runs_once() {
    let (dir, taskfile) = load_taskfile(
        r#"
tasks:
  base: { cmds: ["echo base >> runs"] }
  left: { deps: [base], cmds: ["echo left >> runs"] }
  right: { deps: [base], cmds: ["echo right >> runs"] }
  top: { deps: [left, right], cmds: ["echo top >> runs"] }
"#,
    );
    let ctx = silent_context(&taskfile);
    Executor::new(&taskfile, &ctx).run("top").unwrap().into_result().unwrap();

    assert_eq!(read_file(dir.path(), "runs"), "base\nleft\nright\ntop\n");
}

#[test]
fn test_failing_shell_variable_reports_resolution_error() {
    let (dir, taskfile) = load_taskfile(
        r#"
tasks:
  release:
    vars:
      TAG: { sh: "echo no tag found >&2; exit 1" }
    cmds: [touch released]
"#,
    );
    let ctx = silent_context(&taskfile);
    let report = Executor::new(&taskfile, &ctx).run("release").unwrap();

    match report.into_result() {
        Err(ExecutionError::VariableResolution { task, name, stderr }) => {
            assert_eq!(task, "release");
            assert_eq!(name, "TAG");
            assert_eq!(stderr, "no tag found");
        }
        other => panic!("expected resolution error, got {:?}", other),
    }
    assert!(!dir.path().join("released").exists());
}

#[test]
fn test_included_namespace_runs_in_its_directory() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let root = temp_dir.path();
    let path = write_file(
        root,
        "Taskfile.yml",
        r#"
vars:
  PROJECT: shop
includes:
  db:
    taskfile: infra/db.yml
    dir: infra
    vars:
      PORT: "5432"
tasks:
  up:
    deps: ["db:migrate"]
    cmds: ["echo up >> log"]
"#,
    );
    write_file(
        root,
        "infra/db.yml",
        r#"
vars:
  DSN: "{{.PROJECT}}@db:{{.PORT}}"
tasks:
  migrate:
    cmds: ["printf %s '{{.DSN}}' > dsn"]
"#,
    );

    let taskfile = Taskfile::load(&path).unwrap();
    let ctx = silent_context(&taskfile);
    Executor::new(&taskfile, &ctx).run("up").unwrap().into_result().unwrap();

    assert_eq!(read_file(&root.join("infra"), "dsn"), "shop@db:5432");
    assert_eq!(read_file(root, "log"), "up\n");
}

#[test]
fn test_cli_args_are_available_to_commands() {
    let (dir, taskfile) = load_taskfile(
        r#"
tasks:
  echo:
    cmds: ["printf '%s|%s' '{{.CLI_ARGS}}' '{{.ARG2}}' > args"]
"#,
    );
    let ctx = silent_context(&taskfile).with_cli_args(vec!["one".to_string(), "two".to_string()]);
    Executor::new(&taskfile, &ctx).run("echo").unwrap().into_result().unwrap();

    assert_eq!(read_file(dir.path(), "args"), "one two|two");
}

#[test]
fn test_sources_and_generates_skip() {
    let (dir, taskfile) = load_taskfile(
        r#"
tasks:
  bundle:
    sources: ["src/*.js"]
    generates: [dist/bundle.js]
    cmds: ["mkdir -p dist", "cat src/*.js > dist/bundle.js", "echo built >> runs"]
"#,
    );
    write_file(dir.path(), "src/app.js", "console.log(1);\n");
    let ctx = silent_context(&taskfile);

    let first = Executor::new(&taskfile, &ctx).run("bundle").unwrap();
    assert_eq!(first.outcome("bundle"), Some(&TaskOutcome::Succeeded));

    let second = Executor::new(&taskfile, &ctx).run("bundle").unwrap();
    assert_eq!(second.outcome("bundle"), Some(&TaskOutcome::Skipped));
    assert_eq!(read_file(dir.path(), "runs"), "built\n");
}

#[test]
fn test_plan_is_topological() {
    let (_dir, taskfile) = load_taskfile(
        r#"
tasks:
  deploy: { deps: [build, migrate] }
  build: { deps: [deps] }
  migrate: { deps: [db] }
  deps: {}
  db: {}
"#,
    );
    let plan = ExecutionPlan::build(&taskfile, "deploy").unwrap();
    let position = |name: &str| plan.tasks().iter().position(|t| t == name).unwrap();

    assert_eq!(plan.len(), 5);
    for task in taskfile.tasks() {
        for dep in &task.deps {
            assert!(position(dep.as_str()) < position(task.name.as_str()));
        }
    }
}

#[test]
fn test_background_job_does_not_block_the_task() {
    let (dir, taskfile) = load_taskfile(
        r#"
tasks:
  serve:
    timeout: 500ms
    cmds: ["sleep 4 & echo started", "echo next >> runs"]
"#,
    );
    let ctx = silent_context(&taskfile);
    let started = std::time::Instant::now();
    let report = Executor::new(&taskfile, &ctx).run("serve").unwrap();

    assert_eq!(report.outcome("serve"), Some(&TaskOutcome::Succeeded));
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
    assert_eq!(read_file(dir.path(), "runs"), "next\n");
}
