//! Error types for compiling, loading, and executing templates

use std::path::PathBuf;

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Byte range in template source text
pub type Span = std::ops::Range<usize>;

/// Malformed template source, as reported by the compiler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}{}", .line.map(|l| format!(" (line {l})")).unwrap_or_default())]
pub struct CompileError {
    /// Human-readable description of the problem
    pub message: String,
    /// 1-based line of the error, when the compiler knows it
    pub line: Option<usize>,
    /// Byte range of the error, when the compiler knows it
    pub span: Option<Span>,
}

impl CompileError {
    /// Create an error without location information
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            span: None,
        }
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let span = self.resolve_span(source);
        let mut buf = Vec::new();
        let written = Report::build(ReportKind::Error, filename, span.start)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, span))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            )
            .finish()
            .write((filename, Source::from(source)), &mut buf);

        match written {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => format!("{filename}: {self}"),
        }
    }

    /// Best known span: the reported one, else the whole reported line, else
    /// the start of the file.
    fn resolve_span(&self, source: &str) -> Span {
        let clamp = |pos: usize| pos.min(source.len());
        if let Some(span) = &self.span {
            return clamp(span.start)..clamp(span.end.max(span.start));
        }
        let Some(line) = self.line else {
            return 0..0;
        };

        let start = source
            .split_inclusive('\n')
            .take(line.saturating_sub(1))
            .map(str::len)
            .sum::<usize>();
        let end = source[clamp(start)..]
            .find('\n')
            .map(|n| start + n)
            .unwrap_or(source.len());
        clamp(start)..clamp(end)
    }
}

/// Failure while applying a compiled template to data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecuteError {
    pub message: String,
}

impl ExecuteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced by the registry and by individual templates
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Template source could not be compiled
    #[error("failed to parse template '{name}': {source}")]
    Parse {
        name: String,
        #[source]
        source: CompileError,
    },

    /// Template file missing or unreadable
    #[error("failed to read template file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Data did not fit the template at render time
    #[error("failed to execute template '{name}': {source}")]
    Execute {
        name: String,
        #[source]
        source: ExecuteError,
    },

    /// Directory discovery failed
    #[error("failed to walk template directory {}: {message}", .path.display())]
    Walk { path: PathBuf, message: String },

    /// Reload requested on a template its registry no longer holds
    #[error("template '{name}' was removed from its registry and can no longer reload")]
    Detached { name: String },
}

impl TemplateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The compile diagnostic, if this is a parse failure
    pub fn compile_error(&self) -> Option<&CompileError> {
        match self {
            Self::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}
