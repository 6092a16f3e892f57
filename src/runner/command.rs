//! Shell command execution
//!
//! Every subprocess (commands, probes, shell variables) goes through
//! [`ShellCommand`]. Output is captured line by line and optionally echoed
//! to a [`TaskOutput`]. The child runs in its own process group so a timeout
//! or an interrupt can take down everything it spawned.
//!
//! A command is finished when the shell exits. Background jobs it leaves
//! behind may keep the output pipes open; their output is collected for a
//! short grace period and then abandoned, so they never hold up the task.

use crate::runner::cancel::CancelToken;
use crate::runner::output::{Stream, TaskOutput};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command as StdCommand, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long output is still collected after the shell has exited
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// How long a terminated process group gets before SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(3);

/// How a subprocess ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Exited on its own; `None` when killed by a signal
    Exited(Option<i32>),
    /// Killed after exceeding its timeout
    TimedOut,
    /// Killed because the run was interrupted
    Cancelled,
}

/// Captured result of a subprocess
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub state: ExitState,
    pub stdout: String,
    pub stderr: String,
    /// Both streams interleaved in arrival order
    pub combined: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.state == ExitState::Exited(Some(0))
    }

    /// Exit code, if the process exited on its own with one
    pub fn code(&self) -> Option<i32> {
        match self.state {
            ExitState::Exited(code) => code,
            _ => None,
        }
    }
}

#[derive(Default)]
struct Capture {
    stdout: String,
    stderr: String,
    combined: String,
}

impl Capture {
    fn push(&mut self, stream: Stream, line: &str) {
        let target = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        target.push_str(line);
        target.push('\n');
        self.combined.push_str(line);
        self.combined.push('\n');
    }
}

type Line = (Stream, String);

/// A script run through the configured interpreter
pub struct ShellCommand<'a> {
    interpreter: &'a [String],
    script: &'a str,
    dir: &'a Path,
    env: &'a HashMap<String, String>,
    timeout: Option<Duration>,
    cancel: Option<&'a CancelToken>,
    echo: Option<&'a TaskOutput>,
}

impl<'a> ShellCommand<'a> {
    /// `env` is the complete environment of the child
    pub fn new(
        interpreter: &'a [String],
        script: &'a str,
        dir: &'a Path,
        env: &'a HashMap<String, String>,
    ) -> Self {
        ShellCommand {
            interpreter,
            script,
            dir,
            env,
            timeout: None,
            cancel: None,
            echo: None,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Echo output lines while capturing them
    pub fn echo(mut self, output: &'a TaskOutput) -> Self {
        self.echo = Some(output);
        self
    }

    /// Run to completion, timeout or cancellation
    pub fn run(self) -> io::Result<CommandOutput> {
        let (program, args) = self.interpreter.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "interpreter is empty")
        })?;

        let mut command = StdCommand::new(program);
        command
            .args(args)
            .arg(self.script)
            .current_dir(self.dir)
            .env_clear()
            .envs(self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        debug!(script = self.script, dir = %self.dir.display(), "spawning");
        let mut child = command.spawn()?;

        // Readers are detached: a background job holding a pipe open must
        // not keep this call waiting
        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, Stream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, Stream::Stderr, tx.clone());
        }
        drop(tx);

        let mut capture = Capture::default();
        let state = self.supervise(&mut child, &rx, &mut capture)?;
        while let Ok((stream, line)) = rx.try_recv() {
            self.record(&mut capture, stream, &line);
        }
        debug!(script = self.script, ?state, "finished");

        Ok(CommandOutput {
            state,
            stdout: capture.stdout,
            stderr: capture.stderr,
            combined: capture.combined,
        })
    }

    /// Collect output until the shell has exited and its pipes are drained
    ///
    /// The timeout and the cancel token are enforced the whole time,
    /// including while output from leftover background jobs is drained.
    fn supervise(
        &self,
        child: &mut Child,
        rx: &Receiver<Line>,
        capture: &mut Capture,
    ) -> io::Result<ExitState> {
        let started = Instant::now();
        let mut readers_done = false;
        let mut exited: Option<(ExitState, Instant)> = None;

        loop {
            if readers_done {
                thread::sleep(POLL_INTERVAL);
            } else {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok((stream, line)) => self.record(capture, stream, &line),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => readers_done = true,
                }
            }

            let interrupted = self.cancel.is_some_and(CancelToken::is_cancelled);
            let expired = self.timeout.is_some_and(|t| started.elapsed() >= t);

            match exited {
                None => {
                    if let Some(status) = child.try_wait()? {
                        exited = Some((ExitState::Exited(status.code()), Instant::now()));
                    } else if interrupted {
                        terminate(child);
                        return Ok(ExitState::Cancelled);
                    } else if expired {
                        terminate(child);
                        return Ok(ExitState::TimedOut);
                    }
                }
                Some((state, at)) => {
                    if interrupted || expired {
                        signal_group(child.id(), Signal::Kill);
                        return Ok(if interrupted {
                            ExitState::Cancelled
                        } else {
                            ExitState::TimedOut
                        });
                    }
                    if readers_done || at.elapsed() >= DRAIN_GRACE {
                        if !readers_done {
                            debug!(script = self.script, "background output abandoned");
                        }
                        return Ok(state);
                    }
                }
            }
        }
    }

    fn record(&self, capture: &mut Capture, stream: Stream, line: &str) {
        capture.push(stream, line);
        if let Some(echo) = self.echo {
            echo.line(stream, line);
        }
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

/// Send `signal` to the process group led by `pid`
#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let signal = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) has no memory-safety preconditions; the child leads
    // its own process group, so the negated pid addresses only that group
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) {}

/// Stop the child and its whole process group, then reap it
///
/// The group gets SIGTERM first so traps and cleanup handlers run. Whatever
/// is still alive after [`KILL_GRACE`] is killed.
fn terminate(child: &mut Child) {
    let pid = child.id();
    signal_group(pid, Signal::Term);

    let deadline = Instant::now() + KILL_GRACE;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Ok(Some(_)) | Err(_) => break,
        }
    }

    signal_group(pid, Signal::Kill);
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, stream: Stream, tx: Sender<Line>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let line = text.trim_end_matches(|c| c == '\n' || c == '\r');
                    if tx.send((stream, line.to_string())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn sh() -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string()]
    }

    fn os_env() -> HashMap<String, String> {
        env::vars().collect()
    }

    #[test]
    fn test_captures_both_streams() {
        let interpreter = sh();
        let env = os_env();
        let dir = env::temp_dir();
        let output = ShellCommand::new(&interpreter, "echo out; echo err >&2", &dir, &env)
            .run()
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(output.combined.contains("out\n"));
        assert!(output.combined.contains("err\n"));
    }

    #[test]
    fn test_exit_code_is_reported() {
        let interpreter = sh();
        let env = os_env();
        let dir = env::temp_dir();
        let output = ShellCommand::new(&interpreter, "exit 3", &dir, &env).run().unwrap();

        assert!(!output.success());
        assert_eq!(output.code(), Some(3));
    }

    #[test]
    fn test_environment_is_explicit() {
        let interpreter = sh();
        let mut env = os_env();
        env.insert("TASKGRAPH_CMD_TEST".to_string(), "visible".to_string());
        let dir = env::temp_dir();
        let output = ShellCommand::new(&interpreter, "printf %s \"$TASKGRAPH_CMD_TEST\"", &dir, &env)
            .run()
            .unwrap();

        assert_eq!(output.stdout, "visible\n");
    }

    #[test]
    fn test_timeout_kills_the_command() {
        let interpreter = sh();
        let env = os_env();
        let dir = env::temp_dir();
        let started = Instant::now();
        let output = ShellCommand::new(&interpreter, "sleep 5; echo late", &dir, &env)
            .timeout(Some(Duration::from_millis(200)))
            .run()
            .unwrap();

        assert_eq!(output.state, ExitState::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!output.stdout.contains("late"));
    }

    #[test]
    fn test_cancelled_token_stops_the_command() {
        let interpreter = sh();
        let env = os_env();
        let dir = env::temp_dir();
        let cancel = CancelToken::new();
        cancel.cancel();
        let output = ShellCommand::new(&interpreter, "sleep 5", &dir, &env)
            .cancel(&cancel)
            .run()
            .unwrap();

        assert_eq!(output.state, ExitState::Cancelled);
    }

    #[test]
    fn test_echo_receives_lines() {
        let interpreter = sh();
        let env = os_env();
        let dir = env::temp_dir();
        let sink = TaskOutput::buffered();
        ShellCommand::new(&interpreter, "echo one; echo two", &dir, &env)
            .echo(&sink)
            .run()
            .unwrap();

        let lines: Vec<String> = sink.buffered_lines().into_iter().map(|(_, l)| l).collect();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn test_background_job_does_not_hold_the_command() {
        let interpreter = sh();
        let env = os_env();
        let dir = env::temp_dir();
        let started = Instant::now();
        let output = ShellCommand::new(&interpreter, "sleep 4 & echo started", &dir, &env)
            .timeout(Some(Duration::from_millis(500)))
            .run()
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_cancel_lets_traps_run() {
        let interpreter = sh();
        let env = os_env();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(500));
            trigger.cancel();
        });

        let started = Instant::now();
        let output = ShellCommand::new(
            &interpreter,
            "trap 'echo cleaned > marker; exit 130' INT TERM; sleep 3 & wait",
            temp_dir.path(),
            &env,
        )
        .cancel(&cancel)
        .run()
        .unwrap();
        canceller.join().unwrap();

        assert_eq!(output.state, ExitState::Cancelled);
        assert!(started.elapsed() < Duration::from_millis(2500));
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("marker")).unwrap(),
            "cleaned\n"
        );
    }

    #[test]
    fn test_empty_interpreter_is_an_error() {
        let env = os_env();
        let dir = env::temp_dir();
        let result = ShellCommand::new(&[], "true", &dir, &env).run();
        assert!(result.is_err());
    }
}
