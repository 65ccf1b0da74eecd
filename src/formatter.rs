//! Named formatters applied to values inside templates
//!
//! A formatter writes its output straight to a sink and never fails. Every
//! registry carries a [`FormatterTable`] built once at construction by
//! merging the built-in formatters with caller-supplied ones; caller entries
//! win on name collisions.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use minijinja::value::{Value, ValueKind};

/// Signature shared by every formatter: sink, formatter name, values
pub type FormatterFn = dyn Fn(&mut dyn Write, &str, &[Value]) + Send + Sync;

/// A reference-counted formatter function
#[derive(Clone)]
pub struct Formatter(Arc<FormatterFn>);

impl Formatter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut dyn Write, &str, &[Value]) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Run the formatter, writing into `sink`
    pub fn apply(&self, sink: &mut dyn Write, name: &str, values: &[Value]) {
        (self.0)(sink, name, values)
    }

    /// Whether both handles point at the same function
    pub fn ptr_eq(&self, other: &Formatter) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Formatter(..)")
    }
}

/// Case-sensitive mapping from formatter name to formatter
#[derive(Debug, Clone, Default)]
pub struct FormatterTable {
    entries: BTreeMap<String, Formatter>,
}

impl FormatterTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in formatters: `html`, `e`, `addSlashes`, `capFirst`
    pub fn builtins() -> Self {
        let html = Formatter::new(html_formatter);
        let mut table = Self::new();
        table.insert("html", html.clone());
        table.insert("e", html);
        table.insert("addSlashes", Formatter::new(add_slashes_formatter));
        table.insert("capFirst", Formatter::new(cap_first_formatter));
        table
    }

    /// Add or replace a formatter
    pub fn insert(&mut self, name: impl Into<String>, formatter: Formatter) -> Option<Formatter> {
        self.entries.insert(name.into(), formatter)
    }

    /// Builder-style [`FormatterTable::insert`]
    pub fn with(mut self, name: impl Into<String>, formatter: Formatter) -> Self {
        self.insert(name, formatter);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Formatter> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate formatters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Formatter)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Combine `builtins` with `user`, keeping user entries on collision.
///
/// Neither input is modified. Without a user table the result equals the
/// built-ins.
pub fn merge(builtins: &FormatterTable, user: Option<&FormatterTable>) -> FormatterTable {
    let Some(user) = user else {
        return builtins.clone();
    };

    let mut merged = user.clone();
    for (name, formatter) in builtins.iter() {
        if !merged.contains(name) {
            merged.insert(name, formatter.clone());
        }
    }
    merged
}

/// Escape `&`, `<`, `>`, `"` and `'` for HTML.
pub fn html_formatter(w: &mut dyn Write, _name: &str, values: &[Value]) {
    let bytes = value_bytes(values);
    let mut last = 0;
    for (i, b) in bytes.iter().enumerate() {
        let escaped: &[u8] = match b {
            b'&' => b"&amp;",
            b'<' => b"&lt;",
            b'>' => b"&gt;",
            b'"' => b"&#34;",
            b'\'' => b"&#39;",
            _ => continue,
        };
        let _ = w.write_all(&bytes[last..i]);
        let _ = w.write_all(escaped);
        last = i + 1;
    }
    let _ = w.write_all(&bytes[last..]);
}

/// Put a backslash before every double quote. Nothing else is escaped.
pub fn add_slashes_formatter(w: &mut dyn Write, _name: &str, values: &[Value]) {
    let bytes = value_bytes(values);
    for chunk in bytes.split_inclusive(|b| *b == b'"') {
        match chunk.split_last() {
            Some((&b'"', head)) => {
                let _ = w.write_all(head);
                let _ = w.write_all(b"\\\"");
            }
            _ => {
                let _ = w.write_all(chunk);
            }
        }
    }
}

/// Upper-case the first character, leaving the remaining bytes untouched.
///
/// A character whose upper-case form is more than one character (`ß`, `ŉ`,
/// ligatures) is written unchanged.
pub fn cap_first_formatter(w: &mut dyn Write, _name: &str, values: &[Value]) {
    let bytes = value_bytes(values);
    let Some((first, size)) = decode_first_char(&bytes) else {
        return;
    };

    match first {
        Some(c) => {
            let mut upper = c.to_uppercase();
            let c = match (upper.next(), upper.next()) {
                (Some(u), None) => u,
                _ => c,
            };
            let mut buf = [0; 4];
            let _ = w.write_all(c.encode_utf8(&mut buf).as_bytes());
        }
        None => {
            let _ = w.write_all(&bytes[..size]);
        }
    }
    let _ = w.write_all(&bytes[size..]);
}

/// Decode the leading character of `bytes`.
///
/// Returns `None` for empty input. An invalid lead sequence yields
/// `(None, 1)` so callers treat it as a single opaque byte.
fn decode_first_char(bytes: &[u8]) -> Option<(Option<char>, usize)> {
    let lead = *bytes.first()?;
    let width = match lead {
        0x00..=0x7f => 1,
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => return Some((None, 1)),
    };

    let decoded = bytes
        .get(..width)
        .and_then(|seq| std::str::from_utf8(seq).ok())
        .and_then(|s| s.chars().next());
    match decoded {
        Some(c) => Some((Some(c), width)),
        None => Some((None, 1)),
    }
}

/// Byte representation of formatter input.
///
/// A single bytes value is used as-is. Anything else is printed and
/// concatenated, with a space between two adjacent operands when neither of
/// them is a string.
pub(crate) fn value_bytes(values: &[Value]) -> Vec<u8> {
    if let [single] = values {
        if let Some(raw) = single.as_bytes() {
            if single.kind() == ValueKind::Bytes {
                return raw.to_vec();
            }
        }
    }

    let mut out = Vec::new();
    let mut prev_is_string = true;
    for (i, value) in values.iter().enumerate() {
        let is_string = value.kind() == ValueKind::String;
        if i > 0 && !is_string && !prev_is_string {
            out.push(b' ');
        }
        out.extend_from_slice(value.to_string().as_bytes());
        prev_is_string = is_string;
    }
    out
}
