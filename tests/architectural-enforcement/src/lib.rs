//! Architectural Enforcement
//!
//! Source scanning shared by the enforcement tests in `tests/`. The tests
//! keep the async pipeline free of calls that would stall the runtime:
//! - No thread sleeps anywhere in production code
//! - No blocking HTTP client
//! - No blocking filesystem calls in the async store and pipeline modules
//!
//! Only production code is scanned. Everything from a `#[cfg(test)]`
//! attribute to the end of the file is skipped, as are line comments.

use std::fs;
use std::path::{Path, PathBuf};

/// One forbidden pattern found in a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the pattern was found in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Rule that matched
    pub rule: &'static str,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// A forbidden substring and the name reported for it
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Name shown in reports
    pub name: &'static str,
    /// Substring that must not appear in production code
    pub pattern: &'static str,
}

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Production lines of a source file with their 1-based numbers
///
/// Stops at the first `#[cfg(test)]` and drops `//` comments.
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

/// Every `.rs` file under `dir`, relative to the workspace root
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Check one file's production code against `rules`
pub fn scan_file(path: &Path, rules: &[Rule]) -> Vec<Violation> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };

    let mut violations = Vec::new();
    for (line, code) in production_lines(&content) {
        for rule in rules {
            if code.contains(rule.pattern) {
                violations.push(Violation {
                    path: path.to_path_buf(),
                    line,
                    rule: rule.name,
                    text: code.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Check every file under `dir`, skipping paths that end with an allowed suffix
pub fn scan_dir(dir: &str, rules: &[Rule], allowed: &[&str]) -> Vec<Violation> {
    rust_files(dir)
        .into_iter()
        .filter(|path| !allowed.iter().any(|suffix| path.ends_with(suffix)))
        .flat_map(|path| scan_file(&path, rules))
        .collect()
}

/// Print violations and fail the calling test
///
/// # Panics
///
/// Panics when `violations` is not empty.
pub fn assert_clean(what: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n{what} found in production code:\n");
    for violation in violations {
        eprintln!("  {violation}");
    }
    panic!("\nFound {} violation(s): {what}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_skip_tests_and_comments() {
        let source = "use tokio::fs;\n// std::fs is fine here\nfn a() {}\n#[cfg(test)]\nmod tests { use std::fs; }\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "use tokio::fs;"), (3, "fn a() {}")]);
    }

    #[test]
    fn test_workspace_root_has_manifest() {
        assert!(workspace_root().join("Cargo.toml").exists());
        assert!(!rust_files("consensus/core/src").is_empty());
    }
}
