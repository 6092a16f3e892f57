//! Timestamp-based up-to-date check for `sources` / `generates`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Whether the generated files are at least as new as every source
///
/// Patterns are relative to `dir`. The check fails when any generate pattern
/// matches nothing or when no source file exists.
pub fn is_up_to_date(dir: &Path, sources: &[String], generates: &[String]) -> bool {
    if sources.is_empty() || generates.is_empty() {
        return false;
    }

    let newest_source = sources
        .iter()
        .flat_map(|pattern| expand(dir, pattern))
        .filter_map(|path| modified(&path))
        .max();
    let Some(newest_source) = newest_source else {
        debug!(dir = %dir.display(), "no source files matched");
        return false;
    };

    let mut oldest_generated: Option<SystemTime> = None;
    for pattern in generates {
        let times: Vec<SystemTime> = expand(dir, pattern)
            .iter()
            .filter_map(|path| modified(path))
            .collect();
        if times.is_empty() {
            debug!(pattern = %pattern, "generated file missing");
            return false;
        }
        for time in times {
            oldest_generated = Some(oldest_generated.map_or(time, |oldest| oldest.min(time)));
        }
    }

    oldest_generated.is_some_and(|oldest| newest_source <= oldest)
}

fn expand(dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let full = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        format!(
            "{}/{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            pattern
        )
    };

    match glob::glob(&full) {
        Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
        Err(e) => {
            debug!(pattern = %full, error = %e, "invalid glob pattern");
            Vec::new()
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
