//! Nest Templates - a registry of compiled text templates
//!
//! Templates come from strings (looked up by identifier) or from files under a
//! base directory (looked up by relative path). File templates can be
//! recompiled automatically when their file changes, and the stripping file
//! loader drops one trailing newline so fragments nest cleanly inside each
//! other.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use nest_templates::TemplateRegistry;
//!
//! let mut registry = TemplateRegistry::new(".", None);
//! registry.add_string("Hello {{ name|capFirst }}!", "greeting").unwrap();
//!
//! let data = BTreeMap::from([("name", "world")]);
//! let out = registry.get("greeting").unwrap().render(&data).unwrap();
//! assert_eq!(out, "Hello World!");
//! ```

pub mod compiler;
pub mod config;
pub mod error;
pub mod formatter;
pub mod registry;
pub mod template;

pub use compiler::{Compiled, Compiler, Delimiters, JinjaCompiler};
pub use config::{ConfigError, RegistryConfig};
pub use error::{CompileError, ExecuteError, TemplateError};
pub use formatter::{merge, Formatter, FormatterTable};
pub use registry::{FailurePolicy, TemplateRegistry};
pub use template::{Provenance, Template, TrailingNewline};

// Data passed to compiled templates
pub use minijinja::Value;
