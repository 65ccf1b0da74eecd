//! Registry configuration loaded from TOML

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::compiler::Delimiters;
use crate::template::TrailingNewline;

/// Errors that can occur when loading or parsing a registry config
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read registry config: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse registry config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Settings used to build a [`TemplateRegistry`](crate::TemplateRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Directory relative template paths resolve against
    pub base_dir: PathBuf,
    /// Check file templates for changes on every render
    pub reload_on_access: bool,
    /// Newline policy for directory loading
    pub strip_trailing_newline: bool,
    /// Expression delimiters
    pub delimiters: Delimiters,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            reload_on_access: false,
            strip_trailing_newline: true,
            delimiters: Delimiters::default(),
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a config from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_reload_on_access(mut self, enabled: bool) -> Self {
        self.reload_on_access = enabled;
        self
    }

    pub fn with_strip_trailing_newline(mut self, strip: bool) -> Self {
        self.strip_trailing_newline = strip;
        self
    }

    pub fn with_delimiters(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.delimiters = Delimiters::new(left, right);
        self
    }

    /// The loader newline policy selected by `strip_trailing_newline`
    pub fn newline(&self) -> TrailingNewline {
        if self.strip_trailing_newline {
            TrailingNewline::Strip
        } else {
            TrailingNewline::Keep
        }
    }
}
