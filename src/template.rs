//! Compiled templates and on-demand reloading of file-backed templates

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use minijinja::Value;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::compiler::Compiled;
use crate::error::TemplateError;
use crate::registry::SharedSettings;

/// What a file loader does with the final `\n` of a template file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailingNewline {
    /// Drop exactly one trailing `\n`, so nested fragments don't pile up
    /// blank lines
    #[default]
    Strip,
    /// Keep the file content byte for byte
    Keep,
}

/// Where a file-backed template came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Fully resolved path of the backing file
    pub path: PathBuf,
    /// Modification time observed at the last successful (re)compile
    pub modified: SystemTime,
    /// Loaded through a fatal-on-error entry point
    pub strict: bool,
    /// Newline policy used when reading the file
    pub newline: TrailingNewline,
}

/// A compiled template owned by a registry.
///
/// Handles are shared as `Arc<Template>`. Reloading swaps the compiled form
/// inside the same object, so a handle fetched before a reload renders the
/// new content without being fetched again.
#[derive(Debug)]
pub struct Template {
    name: String,
    compiled: RwLock<Box<dyn Compiled>>,
    source_file: Option<Mutex<Provenance>>,
    settings: SharedSettings,
    attached: AtomicBool,
}

impl Template {
    pub(crate) fn new(
        name: impl Into<String>,
        compiled: Box<dyn Compiled>,
        provenance: Option<Provenance>,
        settings: SharedSettings,
    ) -> Self {
        Self {
            name: name.into(),
            compiled: RwLock::new(compiled),
            source_file: provenance.map(Mutex::new),
            settings,
            attached: AtomicBool::new(true),
        }
    }

    /// Identifier for string templates, relative path for file templates
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the file metadata, `None` for string templates
    pub fn provenance(&self) -> Option<Provenance> {
        self.source_file.as_ref().map(|p| p.lock().clone())
    }

    pub fn is_file_backed(&self) -> bool {
        self.source_file.is_some()
    }

    /// Whether the registry still holds this template
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    /// Apply the template to `data`, streaming output into `sink`.
    ///
    /// When the registry has reload-on-access enabled and this template is
    /// file-backed, the file is checked for changes first; a failed reload is
    /// returned and the previous compiled form stays in place.
    pub fn execute<W, S>(&self, mut sink: W, data: &S) -> Result<(), TemplateError>
    where
        W: Write,
        S: Serialize + ?Sized,
    {
        if self.is_file_backed() && self.is_attached() && self.settings.read().reload_on_access {
            self.reload()?;
        }

        let data = Value::from_serialize(data);
        self.compiled
            .read()
            .execute(&mut sink, &data)
            .map_err(|source| TemplateError::Execute {
                name: self.name.clone(),
                source,
            })
    }

    /// Render into a string. On error nothing of the partial output is
    /// returned.
    ///
    /// Invalid UTF-8 in the output is replaced with U+FFFD; use
    /// [`Template::execute`] to get the rendered bytes as written.
    pub fn render<S>(&self, data: &S) -> Result<String, TemplateError>
    where
        S: Serialize + ?Sized,
    {
        let mut buf = Vec::new();
        self.execute(&mut buf, data)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Recompile from the backing file if it changed since the last compile.
    ///
    /// Returns `Ok(true)` when the template was recompiled and `Ok(false)`
    /// when it is string-backed or the file is unchanged. On failure the
    /// last good compiled form is kept.
    pub fn reload(&self) -> Result<bool, TemplateError> {
        let Some(source_file) = &self.source_file else {
            return Ok(false);
        };
        if !self.is_attached() {
            return Err(TemplateError::Detached {
                name: self.name.clone(),
            });
        }

        let mut provenance = source_file.lock();
        let result = self.reload_locked(&mut provenance);
        if let Err(err) = &result {
            if provenance.strict {
                tracing::error!(template = %self.name, error = %err, "reload failed");
            } else {
                tracing::warn!(template = %self.name, error = %err, "reload failed");
            }
        }
        result
    }

    fn reload_locked(&self, provenance: &mut Provenance) -> Result<bool, TemplateError> {
        let current = modified_time(&provenance.path)?;
        if current <= provenance.modified {
            return Ok(false);
        }

        let source = read_source(&provenance.path, provenance.newline)?;
        let compiled = self.settings.read().compile(&self.name, &source)?;
        // Record the time seen after compiling, not the one compared above.
        // Nothing is committed unless this stat succeeds too.
        let modified = modified_time(&provenance.path)?;

        *self.compiled.write() = compiled;
        provenance.modified = modified;
        tracing::debug!(template = %self.name, path = %provenance.path.display(), "reloaded");
        Ok(true)
    }
}

pub(crate) fn modified_time(path: &Path) -> Result<SystemTime, TemplateError> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| TemplateError::io(path, e))
}

/// Read a template file, applying the newline policy
pub(crate) fn read_source(path: &Path, newline: TrailingNewline) -> Result<String, TemplateError> {
    let mut text = fs::read_to_string(path).map_err(|e| TemplateError::io(path, e))?;
    if newline == TrailingNewline::Strip && text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}
