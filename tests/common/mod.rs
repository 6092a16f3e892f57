//! Common test utilities
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use taskgraph::runner::{Context, Taskfile, Verbosity};
use tempfile::TempDir;

/// Create a temporary directory with a Taskfile.yml
pub fn create_test_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("Taskfile.yml");
    fs::write(&config_path, content).unwrap();
    (temp_dir, config_path)
}

/// Create a test config with an empty subdirectory next to it
pub fn create_test_config_in_subdir(content: &str) -> (TempDir, PathBuf, PathBuf) {
    let (temp_dir, config_path) = create_test_config(content);
    let sub_dir = temp_dir.path().join("subdir");
    fs::create_dir(&sub_dir).unwrap();
    (temp_dir, config_path, sub_dir)
}

/// Write `content` to `dir/relative`, creating parent directories
pub fn write_file(dir: &Path, relative: &str, content: &str) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Load a Taskfile from `content` in a fresh temporary directory
pub fn load_taskfile(content: &str) -> (TempDir, Taskfile) {
    let (temp_dir, config_path) = create_test_config(content);
    let taskfile = Taskfile::load(&config_path).unwrap();
    (temp_dir, taskfile)
}

/// Context for `taskfile` that prints nothing
pub fn silent_context(taskfile: &Taskfile) -> Context {
    Context::for_taskfile(taskfile)
        .unwrap()
        .with_verbosity(Verbosity::Silent)
}

/// Contents of `dir/relative`, or an empty string when it does not exist
pub fn read_file(dir: &Path, relative: &str) -> String {
    fs::read_to_string(dir.join(relative)).unwrap_or_default()
}
