//! Configuration file parsing and discovery

use crate::config::types::{Config, Declarations, Include, VarDef};
use crate::error::{ConfigError, ConfigResult};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["Taskfile.yml", "Taskfile.yaml", "taskfile.yml", "taskfile.yaml"];

/// A parsed document together with its position in the namespace tree
#[derive(Debug, Clone)]
pub struct LoadedNamespace {
    /// Qualified namespace name ("" for the root document)
    pub name: String,

    /// Qualified name of the including namespace
    pub parent: Option<String>,

    /// Path of the document on disk
    pub path: PathBuf,

    /// Base working directory for the namespace's tasks
    pub dir: PathBuf,

    /// Variables passed by the include entry
    pub include_vars: Declarations<VarDef>,

    /// The parsed document
    pub config: Config,
}

/// Find the configuration file by searching current and parent directories
pub fn find_config_file() -> ConfigResult<PathBuf> {
    find_config_file_from(env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?)
}

/// Find the configuration file starting from a specific directory
pub fn find_config_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in CONFIG_FILE_NAMES {
            let config_path = current_dir.join(file_name);
            searched_paths.push(config_path.display().to_string());

            if config_path.is_file() {
                return Ok(config_path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Parse a single document from a string
pub fn parse_config(yaml: &str, path: &Path) -> ConfigResult<Config> {
    serde_yaml::from_str(yaml).map_err(|error| ConfigError::Parse {
        path: path.to_path_buf(),
        error,
    })
}

/// Parse a single document from a file
pub fn parse_config_file(path: &Path) -> ConfigResult<Config> {
    let contents = fs::read_to_string(path).map_err(|error| ConfigError::Read {
        path: path.to_path_buf(),
        error,
    })?;

    parse_config(&contents, path)
}

/// Load the root document and every included document, depth first
///
/// The root comes first; each namespace is followed by its own includes in
/// declaration order.
pub fn load_config_tree(path: &Path) -> ConfigResult<Vec<LoadedNamespace>> {
    let path = absolute(path)?;
    let config = parse_config_file(&path)?;
    load_tree(path, config)
}

/// Like [`load_config_tree`], with the root document given as a string
///
/// `path` locates the root document for resolving includes and directories.
pub fn load_config_tree_from_str(yaml: &str, path: &Path) -> ConfigResult<Vec<LoadedNamespace>> {
    let path = absolute(path)?;
    let config = parse_config(yaml, &path)?;
    load_tree(path, config)
}

fn load_tree(path: PathBuf, config: Config) -> ConfigResult<Vec<LoadedNamespace>> {
    let dir = parent_dir(&path);

    let mut namespaces = Vec::new();
    let mut stack = vec![canonical(&path)];
    let root = LoadedNamespace {
        name: String::new(),
        parent: None,
        path,
        dir,
        include_vars: Vec::new(),
        config,
    };
    load_includes(root, &mut namespaces, &mut stack)?;

    Ok(namespaces)
}

/// Push `namespace` and recursively load its includes
fn load_includes(
    namespace: LoadedNamespace,
    namespaces: &mut Vec<LoadedNamespace>,
    stack: &mut Vec<PathBuf>,
) -> ConfigResult<()> {
    let includes = namespace.config.includes.clone();
    let base_dir = parent_dir(&namespace.path);
    let qualified_prefix = namespace.name.clone();
    let namespace_dir = namespace.dir.clone();
    namespaces.push(namespace);

    for (alias, include) in includes {
        if alias.is_empty() || alias.contains(':') {
            return Err(ConfigError::Invalid(format!(
                "Include name '{}' must be non-empty and cannot contain ':'",
                alias
            )));
        }

        let include_path = base_dir.join(include.taskfile());
        let optional = matches!(&include, Include::Detailed(detail) if detail.optional);

        if !include_path.is_file() {
            if optional {
                debug!(path = %include_path.display(), "skipping missing optional include");
                continue;
            }
            return Err(ConfigError::IncludeFile {
                path: include_path,
                error: "file does not exist".to_string(),
            });
        }

        let key = canonical(&include_path);
        if stack.contains(&key) {
            return Err(ConfigError::IncludeCycle(include_path));
        }

        let config = parse_config_file(&include_path).map_err(|e| ConfigError::IncludeFile {
            path: include_path.clone(),
            error: e.to_string(),
        })?;

        let (dir, include_vars) = match include {
            Include::Path(_) => (namespace_dir.clone(), Vec::new()),
            Include::Detailed(detail) => {
                let dir = match &detail.dir {
                    Some(dir) => base_dir.join(dir),
                    None => namespace_dir.clone(),
                };
                (dir, detail.vars)
            }
        };

        let name = if qualified_prefix.is_empty() {
            alias
        } else {
            format!("{}:{}", qualified_prefix, alias)
        };
        debug!(namespace = %name, path = %include_path.display(), "loaded include");

        stack.push(key);
        load_includes(
            LoadedNamespace {
                name,
                parent: Some(qualified_prefix.clone()),
                path: include_path,
                dir,
                include_vars,
                config,
            },
            namespaces,
            stack,
        )?;
        stack.pop();
    }

    Ok(())
}

fn absolute(path: &Path) -> ConfigResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?;
    Ok(cwd.join(path))
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
