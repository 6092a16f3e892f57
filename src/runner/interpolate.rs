//! Variable interpolation for strings
//!
//! Placeholders use the `{{.NAME}}` syntax (inner whitespace allowed). Values
//! are substituted in a single pass: a substituted value is never scanned
//! again, so bindings must already be fully resolved.

use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Interpolate placeholders in a string
///
/// `lookup` maps a variable name to its value. Unknown names render as an
/// empty string.
pub fn interpolate<F>(s: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    placeholder_regex()
        .replace_all(s, |caps: &Captures| {
            let name = &caps[1];
            lookup(name).unwrap_or_else(|| {
                debug!(variable = name, "undefined variable renders as empty");
                String::new()
            })
        })
        .into_owned()
}

/// Names referenced by placeholders in `s`, in order of first appearance
pub fn placeholder_names(s: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    placeholder_regex()
        .captures_iter(s)
        .map(|caps| caps[1].to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
