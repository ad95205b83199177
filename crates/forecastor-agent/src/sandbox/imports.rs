use std::sync::LazyLock;

use regex::Regex;

/// Stdlib modules that are always importable.
pub const BASE_BUILTIN_MODULES: &[&str] = &[
    "__future__",
    "collections",
    "datetime",
    "itertools",
    "math",
    "queue",
    "random",
    "re",
    "stat",
    "statistics",
    "time",
    "unicodedata",
];

/// Allow-list of importable modules.
///
/// `pandas.*` and `pandas` both admit `pandas` and any submodule; `*` admits everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPolicy {
    patterns: Vec<String>,
}

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:from\s+(\.*[\w.]*)\s+import\b|import\s+([^#;]+))")
        .expect("invalid import regex")
});

impl ImportPolicy {
    pub fn new<S: AsRef<str>>(authorized: &[S]) -> Self {
        let mut patterns: Vec<String> =
            BASE_BUILTIN_MODULES.iter().map(|m| m.to_string()).collect();
        for pattern in authorized {
            let pattern = pattern.as_ref().trim();
            if !pattern.is_empty() && !patterns.iter().any(|p| p == pattern) {
                patterns.push(pattern.to_string());
            }
        }
        Self { patterns }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_allowed(&self, module: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            if pattern == "*" {
                return true;
            }
            let base = pattern.strip_suffix(".*").unwrap_or(pattern);
            module == base
                || module
                    .strip_prefix(base)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    /// Static scan of `import` statements. Returns the rejected modules in
    /// first-seen order. Imports hidden behind `exec` or `__import__` are left
    /// to the interpreter-side hook.
    pub fn check(&self, code: &str) -> Result<(), Vec<String>> {
        let mut denied: Vec<String> = Vec::new();
        for module in imported_modules(code) {
            if !self.is_allowed(&module) && !denied.contains(&module) {
                denied.push(module);
            }
        }
        if denied.is_empty() {
            Ok(())
        } else {
            Err(denied)
        }
    }
}

const TRIPLE_QUOTES: [&str; 2] = ["\"\"\"", "'''"];

/// Advances the open triple-quoted string state across one line.
fn string_state_after(line: &str, mut open: Option<&'static str>) -> Option<&'static str> {
    let mut rest = line;
    loop {
        match open {
            Some(delim) => match rest.find(delim) {
                Some(i) => {
                    rest = &rest[i + delim.len()..];
                    open = None;
                }
                None => return open,
            },
            None => {
                let next = TRIPLE_QUOTES
                    .iter()
                    .filter_map(|q| rest.find(q).map(|i| (i, *q)))
                    .min_by_key(|(i, _)| *i);
                let Some((i, delim)) = next else {
                    return None;
                };
                if rest[..i].contains('#') {
                    return None;
                }
                rest = &rest[i + delim.len()..];
                open = Some(delim);
            }
        }
    }
}

fn imported_modules(code: &str) -> Vec<String> {
    let mut modules = Vec::new();
    let mut open_string = None;
    for line in code.lines() {
        let inside_string = open_string.is_some();
        open_string = string_state_after(line, open_string);
        if inside_string {
            continue;
        }
        let Some(caps) = IMPORT_RE.captures(line) else {
            continue;
        };
        if let Some(from) = caps.get(1) {
            modules.push(from.as_str().to_string());
        } else if let Some(list) = caps.get(2) {
            for item in list.as_str().split(',') {
                let name = item.split_whitespace().next().unwrap_or("");
                let name = name.trim_matches(|c| c == '(' || c == ')' || c == '\\');
                if !name.is_empty() {
                    modules.push(name.to_string());
                }
            }
        }
    }
    modules
}
