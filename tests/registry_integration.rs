//! Integration tests for the template registry against real files

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use nest_templates::{
    Formatter, FormatterTable, TemplateError, TemplateRegistry, TrailingNewline,
};

fn ctx(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn write(dir: &TempDir, name: &str, content: &str) {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Rewrite a file and push its mtime `secs` into the future so the change is
/// visible regardless of filesystem timestamp resolution.
fn rewrite(dir: &TempDir, name: &str, content: &str, secs: u64) {
    write(dir, name, content);
    touch(&dir.path().join(name), secs);
}

fn touch(path: &Path, secs: u64) {
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

// ============================================
// Loading and lookup
// ============================================

#[test]
fn test_add_file_then_remove_then_get_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "page.html", "page");
    let mut registry = TemplateRegistry::new(dir.path(), None);

    registry.add_file("page.html").unwrap();
    assert!(registry.get_file("page.html").is_some());

    assert!(registry.remove_file("page.html"));
    assert!(registry.get_file("page.html").is_none());
    assert!(!registry.remove_file("page.html"));
}

#[test]
fn test_namespaces_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "same", "from file");
    let mut registry = TemplateRegistry::new(dir.path(), None);

    registry.add_string("from string", "same").unwrap();
    registry.add_file("same").unwrap();

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.get("same").unwrap().render(&ctx(&[])).unwrap(), "from string");
    assert_eq!(registry.get_file("same").unwrap().render(&ctx(&[])).unwrap(), "from file");

    registry.remove("same");
    assert!(registry.get_file("same").is_some());
}

#[test]
fn test_clear_empty_registry_returns_false() {
    let mut registry = TemplateRegistry::new(".", None);
    assert!(!registry.clear());
}

#[test]
fn test_clear_empties_both_namespaces() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "a.txt", "a");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    let string_template = registry.add_string("s", "s").unwrap();
    let file_template = registry.add_file("a.txt").unwrap();

    assert!(registry.clear());
    assert!(registry.is_empty());
    assert!(registry.get("s").is_none());
    assert!(registry.get_file("a.txt").is_none());
    assert!(!string_template.is_attached());
    assert!(!file_template.is_attached());
    assert!(!registry.clear());
}

#[test]
fn test_add_file_missing_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = TemplateRegistry::new(dir.path(), None);

    let err = registry.add_file("missing.html").unwrap_err();
    assert!(matches!(err, TemplateError::Io { .. }));
    assert!(registry.is_empty());
}

#[test]
fn test_add_file_parse_error_keeps_previous_entry() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "t.html", "good");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    registry.add_file("t.html").unwrap();

    rewrite(&dir, "t.html", "{% if %}", 10);
    let err = registry.add_file("t.html").unwrap_err();
    assert!(err.compile_error().is_some());
    assert_eq!(registry.get_file("t.html").unwrap().render(&ctx(&[])).unwrap(), "good");
}

#[test]
#[should_panic]
fn test_must_add_file_panics_on_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = TemplateRegistry::new(dir.path(), None);
    registry.must_add_file("missing.html");
}

#[test]
#[should_panic(expected = "failed to parse template")]
fn test_must_add_file_keep_newline_panics_on_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "bad.html", "{% for %}\n");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    registry.must_add_file_keep_newline("bad.html");
}

// ============================================
// Newline policy and nested composition
// ============================================

#[test]
fn test_nested_fragment_strip_and_keep_on_same_file() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "item.html", "<li>{{ name }}</li>\n");
    write(&dir, "list.html", "<ul>\n{{ body }}\n</ul>\n");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    let parent = registry.add_file("list.html").unwrap();

    let stripped = registry.add_file("item.html").unwrap();
    let body = stripped.render(&ctx(&[("name", "one")])).unwrap();
    let out = parent.render(&ctx(&[("body", body.as_str())])).unwrap();
    assert_eq!(out, "<ul>\n<li>one</li>\n</ul>");

    let kept = registry.add_file_keep_newline("item.html").unwrap();
    let body = kept.render(&ctx(&[("name", "one")])).unwrap();
    let out = parent.render(&ctx(&[("body", body.as_str())])).unwrap();
    assert_eq!(out, "<ul>\n<li>one</li>\n\n</ul>");

    assert!(!stripped.is_attached());
    assert_eq!(kept.provenance().unwrap().newline, TrailingNewline::Keep);
}

#[test]
fn test_strip_removes_only_one_newline() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "t.txt", "x\n\n");
    let mut registry = TemplateRegistry::new(dir.path(), None);

    let out = registry.add_file("t.txt").unwrap().render(&ctx(&[])).unwrap();
    assert_eq!(out, "x\n");
}

// ============================================
// Reload
// ============================================

#[test]
fn test_no_implicit_reload_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "t.txt", "v1");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    let template = registry.add_file("t.txt").unwrap();
    assert_eq!(template.render(&ctx(&[])).unwrap(), "v1");

    rewrite(&dir, "t.txt", "v2", 10);
    assert_eq!(template.render(&ctx(&[])).unwrap(), "v1");

    registry.set_reload_on_access(true);
    assert_eq!(template.render(&ctx(&[])).unwrap(), "v2");
}

#[test]
fn test_lookup_does_not_reload() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "t.txt", "v1");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    registry.set_reload_on_access(true);
    let template = registry.add_file("t.txt").unwrap();
    let before = template.provenance().unwrap().modified;

    rewrite(&dir, "t.txt", "v2", 10);
    registry.get_file("t.txt").unwrap();
    assert_eq!(template.provenance().unwrap().modified, before);
}

#[test]
fn test_reload_keeps_identity() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "t.txt", "Hello {{ who }}");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    registry.set_reload_on_access(true);
    let cached = registry.add_file("t.txt").unwrap();

    rewrite(&dir, "t.txt", "Bye {{ who }}", 10);
    let fetched = registry.get_file("t.txt").unwrap();
    assert!(Arc::ptr_eq(&cached, &fetched));
    insta::assert_snapshot!(cached.render(&ctx(&[("who", "you")])).unwrap(), @"Bye you");
}

#[test]
fn test_explicit_reload_reports_change() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "t.txt", "v1");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    let template = registry.add_file("t.txt").unwrap();

    assert!(!template.reload().unwrap());
    rewrite(&dir, "t.txt", "v2", 10);
    assert!(template.reload().unwrap());
    assert!(!template.reload().unwrap());
    assert_eq!(template.render(&ctx(&[])).unwrap(), "v2");
}

#[test]
fn test_reload_string_template_is_noop() {
    let mut registry = TemplateRegistry::new(".", None);
    let template = registry.add_string("x", "x").unwrap();
    assert!(!template.reload().unwrap());
}

#[test]
fn test_failed_reload_keeps_last_good_state() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "t.txt", "good {{ v }}");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    registry.set_reload_on_access(true);
    let template = registry.add_file("t.txt").unwrap();
    let data = ctx(&[("v", "1")]);

    rewrite(&dir, "t.txt", "broken {% if %}", 10);
    let err = template.render(&data).unwrap_err();
    assert!(matches!(err, TemplateError::Parse { .. }));

    // The failed compile left the recorded mtime alone, so the freshness
    // check keeps failing until the file is fixed.
    assert!(template.render(&data).is_err());
    registry.set_reload_on_access(false);
    assert_eq!(template.render(&data).unwrap(), "good 1");

    registry.set_reload_on_access(true);
    rewrite(&dir, "t.txt", "fixed {{ v }}", 20);
    assert_eq!(template.render(&data).unwrap(), "fixed 1");
}

#[test]
fn test_reload_of_deleted_file_keeps_last_good_state() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "t.txt", "still here");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    let template = registry.add_file("t.txt").unwrap();

    fs::remove_file(dir.path().join("t.txt")).unwrap();
    assert!(matches!(template.reload(), Err(TemplateError::Io { .. })));
    assert_eq!(template.render(&ctx(&[])).unwrap(), "still here");
}

#[test]
fn test_reload_uses_current_delimiters() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "t.txt", "[[ x ]]");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    let template = registry.add_file("t.txt").unwrap();
    let data = ctx(&[("x", "value")]);
    assert_eq!(template.render(&data).unwrap(), "[[ x ]]");

    registry.set_delimiters("[[", "]]");
    assert_eq!(template.render(&data).unwrap(), "[[ x ]]");

    touch(&dir.path().join("t.txt"), 10);
    assert!(template.reload().unwrap());
    assert_eq!(template.render(&data).unwrap(), "value");
}

#[test]
fn test_reload_reads_original_path_after_base_dir_change() {
    let dir = tempfile::tempdir().unwrap();
    let other = tempfile::tempdir().unwrap();
    write(&dir, "t.txt", "v1");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    let template = registry.add_file("t.txt").unwrap();

    registry.set_base_dir(other.path());
    assert!(registry.get_file("t.txt").is_none());

    rewrite(&dir, "t.txt", "v2", 10);
    assert!(template.reload().unwrap());
    assert_eq!(template.render(&ctx(&[])).unwrap(), "v2");
    assert_eq!(template.provenance().unwrap().path, dir.path().join("t.txt"));
}

#[test]
fn test_detached_template_cannot_reload() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "t.txt", "v1");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    registry.set_reload_on_access(true);
    let template = registry.add_file("t.txt").unwrap();
    registry.remove_file("t.txt");

    rewrite(&dir, "t.txt", "v2", 10);
    assert!(matches!(template.reload(), Err(TemplateError::Detached { .. })));
    // Rendering skips the freshness check once detached.
    assert_eq!(template.render(&ctx(&[])).unwrap(), "v1");
}

// ============================================
// Rendering
// ============================================

#[test]
fn test_render_returns_no_partial_output_on_error() {
    let mut registry = TemplateRegistry::new(".", None);
    let template = registry.add_string("before {{ missing }} after", "t").unwrap();

    let err = template.render(&ctx(&[])).unwrap_err();
    assert!(matches!(err, TemplateError::Execute { .. }));
}

#[test]
fn test_execute_streams_into_sink() {
    let mut registry = TemplateRegistry::new(".", None);
    let template = registry.add_string("{{ a }}-{{ b }}", "t").unwrap();

    let mut out = Vec::new();
    template.execute(&mut out, &ctx(&[("a", "1"), ("b", "2")])).unwrap();
    assert_eq!(out, b"1-2");
}

#[test]
fn test_builtin_formatters_end_to_end() {
    let mut registry = TemplateRegistry::new(".", None);
    let template = registry
        .add_string(
            "{{ name|capFirst }} said {{ quote|addSlashes }} {{ tag|html }}{{ tag|e }}",
            "t",
        )
        .unwrap();

    let out = template
        .render(&ctx(&[("name", "neste"), ("quote", r#""hi""#), ("tag", "<b>")]))
        .unwrap();
    assert_eq!(out, r#"Neste said \"hi\" &lt;b&gt;&lt;b&gt;"#);
}

#[test]
fn test_user_formatter_overrides_builtin() {
    let user = FormatterTable::new().with(
        "e",
        Formatter::new(|w, name, _| {
            let _ = write!(w, "[{name}]");
        }),
    );
    let mut registry = TemplateRegistry::new(".", Some(&user));
    let template = registry.add_string("{{ 'x'|e }}{{ 'x'|html }}", "t").unwrap();

    assert_eq!(template.render(&ctx(&[])).unwrap(), "[e]x");
}

#[test]
fn test_render_from_several_threads() {
    let mut registry = TemplateRegistry::new(".", None);
    let template = registry.add_string("#{{ n }}", "t").unwrap();

    std::thread::scope(|s| {
        for i in 0..4 {
            let template = Arc::clone(&template);
            s.spawn(move || {
                let n = i.to_string();
                assert_eq!(template.render(&ctx(&[("n", n.as_str())])).unwrap(), format!("#{i}"));
            });
        }
    });
}

// ============================================
// Directory loading
// ============================================

#[test]
fn test_add_directory_keys_relative_to_base() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "partials/a.html", "A\n");
    write(&dir, "partials/nested/b.html", "B\n");
    write(&dir, "other.html", "other");
    let mut registry = TemplateRegistry::new(dir.path(), None);

    let loaded = registry.add_directory("partials");
    let names: Vec<_> = loaded.iter().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["partials/a.html", "partials/nested/b.html"]);

    assert_eq!(
        registry.get_file("partials/nested/b.html").unwrap().render(&ctx(&[])).unwrap(),
        "B"
    );
    assert!(registry.get_file("other.html").is_none());
}

#[test]
fn test_add_directory_with_trailing_separator_in_base() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "views/index.html", "index");
    let base = format!("{}/", dir.path().display());
    let mut registry = TemplateRegistry::new(base, None);

    let loaded = registry.add_directory("views");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].name(), "views/index.html");
    assert!(registry.get_file("views/index.html").is_some());
}

#[test]
#[should_panic]
fn test_add_directory_panics_on_broken_template() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "views/ok.html", "fine");
    write(&dir, "views/zz.html", "{% endfor %}");
    let mut registry = TemplateRegistry::new(dir.path(), None);
    registry.add_directory("views");
}

#[test]
fn test_load_directory_propagates_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = TemplateRegistry::new(dir.path(), None);

    let err = registry
        .load_directory("nope", TrailingNewline::Strip, nest_templates::FailurePolicy::Propagate)
        .unwrap_err();
    assert!(matches!(err, TemplateError::Walk { .. }));
}
