//! Default compiler backed by minijinja

use std::io::Write;

use minijinja::syntax::SyntaxConfig;
use minijinja::value::Rest;
use minijinja::{AutoEscape, Environment, Error, UndefinedBehavior, Value};

use super::{Compiled, Compiler, Delimiters};
use crate::error::{CompileError, ExecuteError};
use crate::formatter::FormatterTable;

/// Compiles templates with minijinja.
///
/// The delimiter pair sets the variable delimiters; blocks keep `{% %}` and
/// comments keep `{# #}`. Every formatter becomes a filter of the same name.
#[derive(Debug, Default, Clone, Copy)]
pub struct JinjaCompiler;

impl JinjaCompiler {
    pub fn new() -> Self {
        Self
    }

    fn environment(
        delimiters: &Delimiters,
        formatters: &FormatterTable,
    ) -> Result<Environment<'static>, Error> {
        let syntax = SyntaxConfig::builder()
            .variable_delimiters(delimiters.left.clone(), delimiters.right.clone())
            .build()?;

        let mut env = Environment::new();
        env.set_syntax(syntax);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        // Newline stripping is the loader's decision, not the engine's.
        env.set_keep_trailing_newline(true);

        for (name, formatter) in formatters.iter() {
            let formatter = formatter.clone();
            let filter_name = name.to_string();
            env.add_filter(name.to_string(), move |value: Value, rest: Rest<Value>| {
                let mut values = Vec::with_capacity(rest.len() + 1);
                values.push(value);
                values.extend(rest.iter().cloned());

                // Filters return strings, so invalid UTF-8 from a formatter
                // becomes U+FFFD here.
                let mut out = Vec::new();
                formatter.apply(&mut out, &filter_name, &values);
                Value::from_safe_string(String::from_utf8_lossy(&out).into_owned())
            });
        }
        Ok(env)
    }
}

impl Compiler for JinjaCompiler {
    fn compile(
        &self,
        name: &str,
        source: &str,
        delimiters: &Delimiters,
        formatters: &FormatterTable,
    ) -> Result<Box<dyn Compiled>, CompileError> {
        let mut env = Self::environment(delimiters, formatters).map_err(compile_error)?;
        env.add_template_owned(name.to_string(), source.to_string())
            .map_err(compile_error)?;

        Ok(Box::new(JinjaTemplate {
            env,
            name: name.to_string(),
        }))
    }
}

#[derive(Debug)]
struct JinjaTemplate {
    env: Environment<'static>,
    name: String,
}

impl Compiled for JinjaTemplate {
    fn execute(&self, sink: &mut dyn Write, data: &Value) -> Result<(), ExecuteError> {
        let template = self
            .env
            .get_template(&self.name)
            .map_err(|e| ExecuteError::new(e.to_string()))?;
        template
            .render_captured_to(data, sink)
            .map(|_| ())
            .map_err(|e| ExecuteError::new(e.to_string()))
    }
}

fn compile_error(err: Error) -> CompileError {
    let message = match err.detail() {
        Some(detail) => format!("{}: {}", err.kind(), detail),
        None => err.kind().to_string(),
    };
    CompileError {
        message,
        line: err.line(),
        span: err.range(),
    }
}
