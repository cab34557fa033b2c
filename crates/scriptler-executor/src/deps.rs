//! Import scanner: which external packages does a script need?
//!
//! This is a line-anchored heuristic, not a parser. Only statements that start
//! a line (after indentation) are recognised, which keeps text inside strings
//! or trailing comments from producing false positives. Missed imports are
//! acceptable; the interpreter will report them when the script runs.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scriptler_core::Language;

/// Deduplicated package identifiers, kept sorted for stable log output.
pub type DependencySet = BTreeSet<String>;

/// `import a.b, c as d`: the capture is everything after the keyword.
static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+([^#;]+)").expect("valid regex"));

/// `from a.b import x`. Relative imports (`from .x`) do not match.
static FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*from\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s+import\b")
        .expect("valid regex")
});

/// Top-level packages referenced by `source`.
///
/// Only Python scripts get dependency installation; JavaScript always yields
/// an empty set.
pub fn extract(source: &str, language: Language) -> DependencySet {
    match language {
        Language::Python => extract_python(source),
        Language::JavaScript => DependencySet::new(),
    }
}

fn extract_python(source: &str) -> DependencySet {
    let mut modules = DependencySet::new();
    for line in source.lines() {
        if let Some(caps) = FROM_RE.captures(line) {
            modules.insert(top_level(&caps[1]).to_string());
        } else if let Some(caps) = IMPORT_RE.captures(line) {
            for item in caps[1].split(',') {
                // `pkg.sub as alias` → `pkg.sub`
                let Some(path) = item.split_whitespace().next() else {
                    continue;
                };
                if is_dotted_identifier(path) {
                    modules.insert(top_level(path).to_string());
                }
            }
        }
    }
    modules
}

fn top_level(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

fn is_dotted_identifier(path: &str) -> bool {
    path.split('.').all(|part| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> DependencySet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn import_and_from_reduce_to_top_level() {
        let deps = extract("import os\nfrom foo.bar import baz\n", Language::Python);
        assert_eq!(deps, set(&["os", "foo"]));
    }

    #[test]
    fn indented_and_aliased_imports_are_found() {
        let src = "def f():\n    import numpy as np\n    from bs4 import BeautifulSoup\n";
        assert_eq!(extract(src, Language::Python), set(&["bs4", "numpy"]));
    }

    #[test]
    fn comma_separated_imports_are_all_found() {
        let src = "import json, requests.adapters as ra  # comment\n";
        assert_eq!(extract(src, Language::Python), set(&["json", "requests"]));
    }

    #[test]
    fn duplicates_collapse() {
        let src = "import os\nimport os.path\nfrom os import sep\n";
        assert_eq!(extract(src, Language::Python), set(&["os"]));
    }

    #[test]
    fn mid_line_mentions_are_ignored() {
        let src = "print('import requests')\nx = 1 # from foo import bar\n";
        assert!(extract(src, Language::Python).is_empty());
    }

    #[test]
    fn relative_and_malformed_statements_are_ignored() {
        let src = "from . import sibling\nfrom .pkg import x\nimport\nimport 3d\nfrom foo\n";
        assert!(extract(src, Language::Python).is_empty());
    }

    #[test]
    fn javascript_has_no_installable_dependencies() {
        let src = "import fs from 'fs';\nconst http = require('http');\n";
        assert!(extract(src, Language::JavaScript).is_empty());
    }
}
