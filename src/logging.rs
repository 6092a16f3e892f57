//! Diagnostic logging via `tracing`
//!
//! Level priority:
//! 1. `-v/--verbose` raises the level to `debug`
//! 2. `TASKGRAPH_LOG` environment variable (e.g. "info", "trace")
//! 3. default to `warn`
//!
//! User-facing progress lines are not logs; they are printed by the runner
//! according to the verbosity flags.

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::fmt;

/// Environment variable holding the log level
pub const LOG_ENV: &str = "TASKGRAPH_LOG";

/// Install the global subscriber, writing to stderr
pub fn init_logging(verbose: bool) -> Result<()> {
    let level = resolve_level(verbose, std::env::var(LOG_ENV).ok().as_deref());

    fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {}", e))
}

fn resolve_level(verbose: bool, env_value: Option<&str>) -> Level {
    let configured = env_value.and_then(parse_level_str).unwrap_or(Level::WARN);
    if verbose && configured < Level::DEBUG {
        Level::DEBUG
    } else {
        configured
    }
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
