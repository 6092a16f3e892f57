//! Configuration parsing and validation
//!
//! This module handles discovery and parsing of Taskfile.yml documents,
//! include resolution and validation of each document's structure.

pub mod parse;
pub mod schema;
pub mod types;

// Re-export main types
pub use parse::*;
pub use schema::*;
pub use types::*;
