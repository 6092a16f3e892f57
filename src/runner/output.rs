//! Output sinks for running tasks
//!
//! In sequential mode output goes straight to the terminal. In parallel mode
//! each task writes into its own buffer, which the executor flushes in plan
//! order so lines from concurrent tasks never interleave.

use std::io::Write;
use std::sync::Mutex;

/// Which terminal stream a line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Destination for one task's output
#[derive(Debug)]
pub struct TaskOutput {
    buffer: Option<Mutex<Vec<(Stream, String)>>>,
}

impl TaskOutput {
    /// Write through to the terminal
    pub fn live() -> Self {
        TaskOutput { buffer: None }
    }

    /// Hold lines until [`TaskOutput::flush`]
    pub fn buffered() -> Self {
        TaskOutput {
            buffer: Some(Mutex::new(Vec::new())),
        }
    }

    /// Emit one line (without its trailing newline)
    pub fn line(&self, stream: Stream, line: &str) {
        match &self.buffer {
            Some(buffer) => {
                if let Ok(mut lines) = buffer.lock() {
                    lines.push((stream, line.to_string()));
                }
            }
            None => write_line(stream, line),
        }
    }

    /// Print and clear everything buffered so far
    pub fn flush(&self) {
        let Some(buffer) = &self.buffer else {
            return;
        };
        let lines = match buffer.lock() {
            Ok(mut lines) => std::mem::take(&mut *lines),
            Err(_) => return,
        };
        for (stream, line) in lines {
            write_line(stream, &line);
        }
    }

    /// Lines currently held in the buffer
    pub fn buffered_lines(&self) -> Vec<(Stream, String)> {
        match &self.buffer {
            Some(buffer) => buffer.lock().map(|lines| lines.clone()).unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

fn write_line(stream: Stream, line: &str) {
    // A closed pipe (e.g. `| head`) is not a task failure
    let _ = match stream {
        Stream::Stdout => writeln!(std::io::stdout().lock(), "{}", line),
        Stream::Stderr => writeln!(std::io::stderr().lock(), "{}", line),
    };
}
