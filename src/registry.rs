//! Template registry: named string templates and path-keyed file templates
//!
//! The registry owns every template it compiles and the configuration those
//! compiles use (base directory, delimiters, formatters, reload flag).
//! Templates keep a handle to that configuration, so a reload always uses the
//! settings current at reload time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use walkdir::WalkDir;

use crate::compiler::{Compiled, Compiler, Delimiters, JinjaCompiler};
use crate::config::RegistryConfig;
use crate::error::TemplateError;
use crate::formatter::{self, FormatterTable};
use crate::template::{modified_time, read_source, Provenance, Template, TrailingNewline};

/// Configuration shared between a registry and its templates
#[derive(Debug)]
pub(crate) struct Settings {
    pub(crate) base_dir: PathBuf,
    pub(crate) delimiters: Delimiters,
    pub(crate) formatters: Arc<FormatterTable>,
    pub(crate) reload_on_access: bool,
    compiler: Arc<dyn Compiler>,
}

impl Settings {
    pub(crate) fn compile(
        &self,
        name: &str,
        source: &str,
    ) -> Result<Box<dyn Compiled>, TemplateError> {
        self.compiler
            .compile(name, source, &self.delimiters, &self.formatters)
            .map_err(|source| TemplateError::Parse {
                name: name.to_string(),
                source,
            })
    }
}

pub(crate) type SharedSettings = Arc<RwLock<Settings>>;

/// What a loader does when a template cannot be read or compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Return the error and leave the registry untouched
    #[default]
    Propagate,
    /// Log the error and panic; meant for startup-time loading where a broken
    /// template should stop the program
    Abort,
}

impl FailurePolicy {
    fn settle<T>(self, result: Result<T, TemplateError>) -> Result<T, TemplateError> {
        match result {
            Err(err) if self == Self::Abort => {
                tracing::error!(error = %err, "fatal template load failure");
                panic!("{err}");
            }
            Err(err) => {
                tracing::warn!(error = %err, "template load failed");
                Err(err)
            }
            ok => ok,
        }
    }
}

/// Registry for compiled templates
#[derive(Debug)]
pub struct TemplateRegistry {
    settings: SharedSettings,
    by_id: HashMap<String, Arc<Template>>,
    /// Keyed by `base_dir.join(relative)`
    by_path: HashMap<PathBuf, Arc<Template>>,
}

impl TemplateRegistry {
    /// Create a registry rooted at `base_dir`.
    ///
    /// `formatters` are merged over the built-ins; the caller's table is
    /// copied, never modified.
    pub fn new(base_dir: impl Into<PathBuf>, formatters: Option<&FormatterTable>) -> Self {
        Self::with_compiler(base_dir, formatters, Arc::new(JinjaCompiler::new()))
    }

    /// Create a registry that compiles with a custom compiler
    pub fn with_compiler(
        base_dir: impl Into<PathBuf>,
        formatters: Option<&FormatterTable>,
        compiler: Arc<dyn Compiler>,
    ) -> Self {
        let formatters = formatter::merge(&FormatterTable::builtins(), formatters);
        Self {
            settings: Arc::new(RwLock::new(Settings {
                base_dir: base_dir.into(),
                delimiters: Delimiters::default(),
                formatters: Arc::new(formatters),
                reload_on_access: false,
                compiler,
            })),
            by_id: HashMap::new(),
            by_path: HashMap::new(),
        }
    }

    /// Create a registry from loaded configuration
    pub fn from_config(config: &RegistryConfig, formatters: Option<&FormatterTable>) -> Self {
        let mut registry = Self::new(config.base_dir.clone(), formatters);
        registry.set_delimiters(config.delimiters.left.clone(), config.delimiters.right.clone());
        registry.set_reload_on_access(config.reload_on_access);
        registry
    }

    /// Compile `source` and store it under `id`, replacing any previous
    /// template with that id.
    pub fn load_string(
        &mut self,
        source: &str,
        id: &str,
        policy: FailurePolicy,
    ) -> Result<Arc<Template>, TemplateError> {
        let result = self
            .settings
            .read()
            .compile(id, source)
            .map(|compiled| Arc::new(Template::new(id, compiled, None, Arc::clone(&self.settings))));
        let template = policy.settle(result)?;

        if let Some(previous) = self.by_id.insert(id.to_string(), Arc::clone(&template)) {
            previous.detach();
        }
        tracing::debug!(id, "added string template");
        Ok(template)
    }

    /// Add a string template, returning any parse error
    pub fn add_string(&mut self, source: &str, id: &str) -> Result<Arc<Template>, TemplateError> {
        self.load_string(source, id, FailurePolicy::Propagate)
    }

    /// Add a string template.
    ///
    /// # Panics
    ///
    /// Panics if the template does not compile.
    pub fn must_add_string(&mut self, source: &str, id: &str) -> Arc<Template> {
        match self.load_string(source, id, FailurePolicy::Abort) {
            Ok(template) => template,
            Err(err) => unreachable!("abort policy returned an error: {err}"),
        }
    }

    /// Read, compile and store the file at `base_dir/relative`
    pub fn load_file(
        &mut self,
        relative: impl AsRef<Path>,
        newline: TrailingNewline,
        policy: FailurePolicy,
    ) -> Result<Arc<Template>, TemplateError> {
        let relative = relative.as_ref();
        let path = self.resolve(relative);
        let result = self.compile_file(relative, &path, newline, policy == FailurePolicy::Abort);
        let template = policy.settle(result)?;

        tracing::debug!(path = %path.display(), "added file template");
        if let Some(previous) = self.by_path.insert(path, Arc::clone(&template)) {
            previous.detach();
        }
        Ok(template)
    }

    fn compile_file(
        &self,
        relative: &Path,
        path: &Path,
        newline: TrailingNewline,
        strict: bool,
    ) -> Result<Arc<Template>, TemplateError> {
        // Stat before reading so a write racing the read is caught by the
        // next reload check.
        let modified = modified_time(path)?;
        let source = read_source(path, newline)?;
        let name = relative.to_string_lossy();
        let compiled = self.settings.read().compile(&name, &source)?;

        let provenance = Provenance {
            path: path.to_path_buf(),
            modified,
            strict,
            newline,
        };
        Ok(Arc::new(Template::new(
            name,
            compiled,
            Some(provenance),
            Arc::clone(&self.settings),
        )))
    }

    /// Add a template file, dropping one trailing newline so rendered
    /// fragments nest without extra blank lines
    pub fn add_file(&mut self, relative: impl AsRef<Path>) -> Result<Arc<Template>, TemplateError> {
        self.load_file(relative, TrailingNewline::Strip, FailurePolicy::Propagate)
    }

    /// Add a template file with its content preserved exactly
    pub fn add_file_keep_newline(
        &mut self,
        relative: impl AsRef<Path>,
    ) -> Result<Arc<Template>, TemplateError> {
        self.load_file(relative, TrailingNewline::Keep, FailurePolicy::Propagate)
    }

    /// Like [`TemplateRegistry::add_file`].
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be read or compiled.
    pub fn must_add_file(&mut self, relative: impl AsRef<Path>) -> Arc<Template> {
        match self.load_file(relative, TrailingNewline::Strip, FailurePolicy::Abort) {
            Ok(template) => template,
            Err(err) => unreachable!("abort policy returned an error: {err}"),
        }
    }

    /// Like [`TemplateRegistry::add_file_keep_newline`].
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be read or compiled.
    pub fn must_add_file_keep_newline(&mut self, relative: impl AsRef<Path>) -> Arc<Template> {
        match self.load_file(relative, TrailingNewline::Keep, FailurePolicy::Abort) {
            Ok(template) => template,
            Err(err) => unreachable!("abort policy returned an error: {err}"),
        }
    }

    /// Load every regular file under `base_dir/relative`, keyed by its path
    /// relative to `base_dir`. Files are visited in name order.
    pub fn load_directory(
        &mut self,
        relative: impl AsRef<Path>,
        newline: TrailingNewline,
        policy: FailurePolicy,
    ) -> Result<Vec<Arc<Template>>, TemplateError> {
        let base_dir = self.base_dir();
        let root = base_dir.join(relative.as_ref());

        let mut templates = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = policy.settle(entry.map_err(|e| TemplateError::Walk {
                path: root.clone(),
                message: e.to_string(),
            }))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let key = policy.settle(entry.path().strip_prefix(&base_dir).map_err(|_| {
                TemplateError::Walk {
                    path: entry.path().to_path_buf(),
                    message: format!("not inside {}", base_dir.display()),
                }
            }))?;
            templates.push(self.load_file(key, newline, policy)?);
        }

        tracing::debug!(root = %root.display(), count = templates.len(), "loaded template directory");
        Ok(templates)
    }

    /// Load every file under `base_dir/relative` with the stripping loader.
    ///
    /// # Panics
    ///
    /// Panics on the first file that cannot be read or compiled, or if the
    /// directory cannot be walked.
    pub fn add_directory(&mut self, relative: impl AsRef<Path>) -> Vec<Arc<Template>> {
        match self.load_directory(relative, TrailingNewline::Strip, FailurePolicy::Abort) {
            Ok(templates) => templates,
            Err(err) => unreachable!("abort policy returned an error: {err}"),
        }
    }

    /// Get a string template by identifier
    pub fn get(&self, id: &str) -> Option<Arc<Template>> {
        self.by_id.get(id).cloned()
    }

    /// Get a file template by its path relative to the base directory
    pub fn get_file(&self, relative: impl AsRef<Path>) -> Option<Arc<Template>> {
        self.by_path.get(&self.resolve(relative.as_ref())).cloned()
    }

    /// Remove a string template. Removing a missing id is not an error.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.by_id.remove(id) {
            Some(template) => {
                template.detach();
                tracing::debug!(id, "removed string template");
                true
            }
            None => false,
        }
    }

    /// Remove a file template. Removing a missing path is not an error.
    pub fn remove_file(&mut self, relative: impl AsRef<Path>) -> bool {
        let path = self.resolve(relative.as_ref());
        match self.by_path.remove(&path) {
            Some(template) => {
                template.detach();
                tracing::debug!(path = %path.display(), "removed file template");
                true
            }
            None => false,
        }
    }

    /// Remove every template. Returns whether anything was removed.
    pub fn clear(&mut self) -> bool {
        let by_id = std::mem::take(&mut self.by_id);
        let by_path = std::mem::take(&mut self.by_path);
        let removed = !by_id.is_empty() || !by_path.is_empty();

        for template in by_id.values().chain(by_path.values()) {
            template.detach();
        }
        removed
    }

    /// Set the expression delimiters for future compiles and reloads
    pub fn set_delimiters(&mut self, left: impl Into<String>, right: impl Into<String>) {
        self.settings.write().delimiters = Delimiters::new(left, right);
    }

    /// Enable or disable the freshness check on every render of a file
    /// template
    pub fn set_reload_on_access(&mut self, enabled: bool) {
        self.settings.write().reload_on_access = enabled;
    }

    /// Change the directory relative paths resolve against.
    ///
    /// Already loaded templates keep reading from the file they were loaded
    /// from.
    pub fn set_base_dir(&mut self, base_dir: impl Into<PathBuf>) {
        self.settings.write().base_dir = base_dir.into();
    }

    pub fn base_dir(&self) -> PathBuf {
        self.settings.read().base_dir.clone()
    }

    pub fn delimiters(&self) -> Delimiters {
        self.settings.read().delimiters.clone()
    }

    pub fn reload_on_access(&self) -> bool {
        self.settings.read().reload_on_access
    }

    /// The effective formatter table (built-ins merged with user entries)
    pub fn formatters(&self) -> Arc<FormatterTable> {
        Arc::clone(&self.settings.read().formatters)
    }

    /// Total number of templates in both namespaces
    pub fn len(&self) -> usize {
        self.by_id.len() + self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty() && self.by_path.is_empty()
    }

    fn resolve(&self, relative: &Path) -> PathBuf {
        self.settings.read().base_dir.join(relative)
    }
}

impl Drop for TemplateRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}
