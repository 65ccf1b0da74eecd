//! Boundary to the template compiler
//!
//! The registry never parses template syntax itself. It hands source text,
//! the current delimiter pair and the formatter table to a [`Compiler`] and
//! stores whatever executable [`Compiled`] object comes back.

mod jinja;

pub use jinja::JinjaCompiler;

use std::fmt;
use std::io::Write;

use minijinja::Value;
use serde::Deserialize;

use crate::error::{CompileError, ExecuteError};
use crate::formatter::FormatterTable;

/// Left/right markers surrounding an expression in template source
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Delimiters {
    pub left: String,
    pub right: String,
}

impl Delimiters {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::new("{{", "}}")
    }
}

impl fmt::Display for Delimiters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.left, self.right)
    }
}

/// Turns template source into an executable form
pub trait Compiler: fmt::Debug + Send + Sync {
    /// Compile `source`, registered under `name` for diagnostics
    fn compile(
        &self,
        name: &str,
        source: &str,
        delimiters: &Delimiters,
        formatters: &FormatterTable,
    ) -> Result<Box<dyn Compiled>, CompileError>;
}

/// A compiled, ready-to-run template
pub trait Compiled: fmt::Debug + Send + Sync {
    /// Apply the template to `data`, streaming output into `sink`
    fn execute(&self, sink: &mut dyn Write, data: &Value) -> Result<(), ExecuteError>;
}
