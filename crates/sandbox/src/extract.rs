//! Dependency discovery from raw source text.
//!
//! Extraction is a line/pattern scan, not a parse: import-like text inside
//! comments or strings is picked up the same as a real import.

use regex::Regex;
use std::sync::OnceLock;

use code_runner_core::types::{DependencySet, Language};

/// Extract the set of top-level third-party packages referenced by `source`.
pub fn extract(source: &str, language: Language) -> DependencySet {
    match language {
        Language::Python => extract_python(source),
        Language::JavaScript => extract_javascript(source),
    }
}

fn python_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^import[ \t]+([^\r\n#]+)").expect("valid regex"))
}

fn python_from_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^from[ \t]+([\w.]+)").expect("valid regex"))
}

fn js_require_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"require\(\s*['"]([^'")]+)['"]"#).expect("valid regex"))
}

fn js_import_from_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"import\s+.*\s+from\s+['"]([^'")]+)['"]"#).expect("valid regex"))
}

fn js_destructured_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"import\s+\{[^}]*\}\s+from\s+['"]([^'")]+)['"]"#).expect("valid regex")
    })
}

/// First dotted segment of a module path, if it is a plain identifier.
fn top_level_module(path: &str) -> Option<&str> {
    let end = path
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(path.len());
    let head = path[..end].split('.').next()?;
    let valid = head
        .chars()
        .next()
        .map_or(false, |c| c.is_alphabetic() || c == '_');
    valid.then_some(head)
}

fn extract_python(source: &str) -> DependencySet {
    let mut deps = DependencySet::new();

    // `import a.b as c, d`
    for caps in python_import_re().captures_iter(source) {
        for clause in caps[1].split(',') {
            let Some(path) = clause.split_whitespace().next() else {
                continue;
            };
            if let Some(module) = top_level_module(path) {
                deps.insert(module);
            }
        }
    }

    // `from a.b import c`; relative imports have an empty head and are skipped
    for caps in python_from_re().captures_iter(source) {
        if let Some(module) = top_level_module(&caps[1]) {
            deps.insert(module);
        }
    }

    deps
}

fn is_relative(path: &str) -> bool {
    path.starts_with("./") || path.starts_with("../")
}

fn extract_javascript(source: &str) -> DependencySet {
    [
        js_require_re(),
        js_import_from_re(),
        js_destructured_import_re(),
    ]
    .into_iter()
    .flat_map(|re| re.captures_iter(source))
    .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
    .filter(|path| !path.is_empty() && !is_relative(path))
    .collect()
}
