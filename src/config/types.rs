//! Core configuration types
//!
//! This module defines the data structures that represent a Taskfile.yml document
//! as written on disk, before includes are resolved and names are qualified.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::fmt;
use std::marker::PhantomData;

/// Ordered `name -> value` declarations, kept in document order
pub type Declarations<T> = Vec<(String, T)>;

/// Top-level configuration structure (one per document)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Schema version (informational)
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,

    /// Interpreter used for every shell command (e.g., ["bash", "-c"])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<Vec<String>>,

    /// Dotenv files loaded into the base environment
    #[serde(
        default,
        deserialize_with = "deserialize_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub dotenv: Vec<String>,

    /// Namespace-level variables
    #[serde(default, deserialize_with = "deserialize_ordered")]
    pub vars: Declarations<VarDef>,

    /// Included documents keyed by namespace alias
    #[serde(default, deserialize_with = "deserialize_ordered")]
    pub includes: Declarations<Include>,

    /// Tasks defined in the document
    #[serde(default, deserialize_with = "deserialize_ordered")]
    pub tasks: Declarations<Task>,
}

/// A task definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Task {
    /// Short description shown by `list`
    #[serde(default, alias = "description", skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    /// Alternative names for the task
    #[serde(
        default,
        deserialize_with = "deserialize_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub aliases: Vec<String>,

    /// Tasks that must complete first
    #[serde(
        default,
        deserialize_with = "deserialize_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub deps: Vec<String>,

    /// Working directory, relative to the namespace directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Task-level variables
    #[serde(default, deserialize_with = "deserialize_ordered")]
    pub vars: Declarations<VarDef>,

    /// Guards that must pass before the commands run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<Precondition>,

    /// Idempotency probes; all passing skips the task
    #[serde(
        default,
        deserialize_with = "deserialize_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub status: Vec<String>,

    /// Source files for the timestamp check
    #[serde(
        default,
        deserialize_with = "deserialize_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sources: Vec<String>,

    /// Generated files for the timestamp check
    #[serde(
        default,
        deserialize_with = "deserialize_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub generates: Vec<String>,

    /// Whether `env` entries of a command carry over to the next one
    #[serde(default)]
    pub env_scope: EnvScope,

    /// Per-command timeout (e.g. "30s", "5m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Do not echo commands before running them
    #[serde(default)]
    pub silent: bool,

    /// Hidden from `list` and not invocable directly
    #[serde(default)]
    pub private: bool,

    /// Commands to execute
    #[serde(
        default,
        deserialize_with = "deserialize_commands",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub cmds: Vec<Command>,
}

/// How environment mutations flow between the commands of one task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvScope {
    /// A command's `env` stays set for the following commands
    #[default]
    Shared,
    /// Every command starts from the task environment
    Isolated,
}

/// A command to execute
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Command {
    /// Simple string command
    Simple(String),

    /// Complex command with additional options
    Complex(CommandDetail),
}

/// Detailed command specification
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandDetail {
    /// The command to execute
    pub cmd: String,

    /// Environment entries for this command
    #[serde(default, deserialize_with = "deserialize_scalar_map")]
    pub env: Declarations<String>,

    /// Working directory, relative to the task directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Do not echo the command
    #[serde(default)]
    pub silent: bool,

    /// Keep going when the command fails
    #[serde(default)]
    pub ignore_error: bool,
}

/// A precondition probe
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Precondition {
    /// Bare shell probe
    Simple(String),

    /// Probe with a failure message
    Complex {
        sh: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
    },
}

/// An include entry
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Include {
    /// Path to the included document
    Path(String),

    /// Include with options
    Detailed(IncludeDetail),
}

/// Detailed include specification
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IncludeDetail {
    /// Path to the included document
    pub taskfile: String,

    /// Working directory for the namespace's tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Variables passed into the namespace
    #[serde(default, deserialize_with = "deserialize_ordered")]
    pub vars: Declarations<VarDef>,

    /// Silently skip the include when the file does not exist
    #[serde(default)]
    pub optional: bool,
}

impl Include {
    /// Path of the included document
    pub fn taskfile(&self) -> &str {
        match self {
            Include::Path(path) => path,
            Include::Detailed(detail) => &detail.taskfile,
        }
    }
}

/// A variable definition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VarDef {
    /// Literal value, possibly containing `{{.VAR}}` placeholders
    Literal(String),

    /// Trimmed standard output of a shell command
    Shell { sh: String },
}

impl VarDef {
    /// The text that is templated before evaluation
    pub fn template(&self) -> &str {
        match self {
            VarDef::Literal(value) => value,
            VarDef::Shell { sh } => sh,
        }
    }
}

impl<'de> Deserialize<'de> for VarDef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let value = Value::deserialize(deserializer)?;

        if let Some(literal) = scalar_to_string(&value) {
            return Ok(VarDef::Literal(literal));
        }

        match value {
            Value::Mapping(map) => match map.get("sh") {
                Some(Value::String(sh)) => Ok(VarDef::Shell { sh: sh.clone() }),
                _ => Err(D::Error::custom("variable mapping must have an `sh` string")),
            },
            _ => Err(D::Error::custom("variable must be a scalar or {sh: ...}")),
        }
    }
}

/// Convert a YAML scalar into its string form
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Custom deserializer for mappings that keeps declaration order and duplicates
fn deserialize_ordered<'de, D, T>(deserializer: D) -> Result<Declarations<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OrderedVisitor<T>(PhantomData<T>);

    impl<'de, T> Visitor<'de> for OrderedVisitor<T>
    where
        T: Deserialize<'de>,
    {
        type Value = Declarations<T>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a mapping")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, T>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_any(OrderedVisitor(PhantomData))
}

/// Custom deserializer for `KEY: scalar` mappings
fn deserialize_scalar_map<'de, D>(deserializer: D) -> Result<Declarations<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let entries: Declarations<Value> = deserialize_ordered(deserializer)?;
    entries
        .into_iter()
        .map(|(key, value)| match scalar_to_string(&value) {
            Some(s) => Ok((key, s)),
            None => Err(D::Error::custom(format!("value of '{}' must be a scalar", key))),
        })
        .collect()
}

/// Custom deserializer for optional scalars (numbers become strings)
fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        other => scalar_to_string(&other)
            .map(Some)
            .ok_or_else(|| D::Error::custom("expected a scalar value")),
    }
}

/// Custom deserializer for fields that accept one string or a list of strings
fn deserialize_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::Sequence(seq) => seq
            .iter()
            .map(|item| {
                scalar_to_string(item)
                    .ok_or_else(|| D::Error::custom("list entries must be strings"))
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => scalar_to_string(&other)
            .map(|s| vec![s])
            .ok_or_else(|| D::Error::custom("expected a string or a list of strings")),
    }
}

/// Custom deserializer for commands that handles both single values and arrays
fn deserialize_commands<'de, D>(deserializer: D) -> Result<Vec<Command>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;

    match value {
        // Single string or complex command
        Value::String(s) => Ok(vec![Command::Simple(s)]),
        Value::Mapping(_) => {
            let cmd = Command::deserialize(value).map_err(D::Error::custom)?;
            Ok(vec![cmd])
        }
        // Array of commands
        Value::Sequence(seq) => {
            let mut cmds = Vec::new();
            for item in seq {
                let cmd = Command::deserialize(item).map_err(D::Error::custom)?;
                cmds.push(cmd);
            }
            Ok(cmds)
        }
        // Null or not present
        Value::Null => Ok(Vec::new()),
        _ => Err(D::Error::custom("cmds must be a string, object, or array")),
    }
}
