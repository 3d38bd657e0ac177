//! Architectural Enforcement Integration Tests
//!
//! This package scans the workspace sources and enforces:
//! - No blocking sleeps in production code
//! - No `unwrap()`/`expect()` or `println!` in the core library
//! - Filesystem access only in the config layer
//! - A runtime-free core: the state machine, buffer, codec, classifier and
//!   recovery modules never touch Tokio
//!
//! Test modules (everything from the first `#[cfg(test)]` on) and comment
//! lines are not scanned.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File, relative to the workspace root
    pub file: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Rule that was broken
    pub rule: &'static str,
    /// The offending source line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {} -> {}",
            self.file.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// A forbidden pattern and where it applies
pub struct Rule {
    /// Short rule name used in reports
    pub name: &'static str,
    /// Substrings that trigger the rule
    pub patterns: &'static [&'static str],
    /// Path fragments the rule applies to
    pub applies_to: &'static [&'static str],
    /// Path fragments exempt from the rule
    pub exempt: &'static [&'static str],
}

impl Rule {
    fn covers(&self, path: &str) -> bool {
        self.applies_to.iter().any(|p| path.contains(p)) && !self.exempt.iter().any(|p| path.contains(p))
    }
}

/// The workspace rules
pub const RULES: &[Rule] = &[
    Rule {
        name: "blocking sleep",
        patterns: &["thread::sleep("],
        applies_to: &["pulse/core/src/", "pulse/daemon/src/"],
        exempt: &[],
    },
    Rule {
        name: "panicking unwrap in library code",
        patterns: &[".unwrap()", ".expect("],
        applies_to: &["pulse/core/src/"],
        exempt: &[],
    },
    Rule {
        name: "stdout printing in library code",
        patterns: &["println!", "print!("],
        applies_to: &["pulse/core/src/"],
        exempt: &[],
    },
    Rule {
        name: "filesystem access outside config",
        patterns: &["std::fs::", "use std::fs"],
        applies_to: &["pulse/core/src/"],
        exempt: &["pulse/core/src/config/"],
    },
    Rule {
        name: "runtime dependency in pure module",
        patterns: &["tokio"],
        applies_to: &[
            "pulse/core/src/session/machine.rs",
            "pulse/core/src/session/scheduler.rs",
            "pulse/core/src/streaming/buffer.rs",
            "pulse/core/src/streaming/synthetic.rs",
            "pulse/core/src/transport/wire.rs",
            "pulse/core/src/transport/heartbeat.rs",
            "pulse/core/src/classify.rs",
            "pulse/core/src/sample.rs",
            "pulse/core/src/recovery/",
        ],
        exempt: &[],
    },
];

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Lines of production code: stops at the first `#[cfg(test)]`, skips comments
pub fn production_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(i, line)| (i + 1, line))
}

/// Check one file's source against `rules`
#[must_use]
pub fn check_source(relative: &str, source: &str, rules: &[Rule]) -> Vec<Violation> {
    let active: Vec<&Rule> = rules.iter().filter(|r| r.covers(relative)).collect();
    if active.is_empty() {
        return Vec::new();
    }

    let mut violations = Vec::new();
    for (line_no, line) in production_lines(source) {
        for rule in &active {
            if rule.patterns.iter().any(|p| line.contains(p)) {
                violations.push(Violation {
                    file: PathBuf::from(relative),
                    line: line_no,
                    rule: rule.name,
                    text: line.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Scan every `.rs` file under `root/pulse`
///
/// # Errors
///
/// Returns an I/O error if a source file cannot be read.
pub fn scan_workspace(root: &Path) -> std::io::Result<Vec<Violation>> {
    let mut violations = Vec::new();
    for entry in WalkDir::new(root.join("pulse"))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
    {
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let source = fs::read_to_string(entry.path())?;
        violations.extend(check_source(&relative, &source, RULES));
    }
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_follows_rules() {
        let root = workspace_root();
        assert!(root.join("pulse/core/src/lib.rs").exists(), "bad root {root:?}");

        let violations = scan_workspace(&root).unwrap();
        let report: Vec<String> = violations.iter().map(ToString::to_string).collect();
        assert!(violations.is_empty(), "violations:\n{}", report.join("\n"));
    }

    #[test]
    fn test_test_modules_are_skipped() {
        let source = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() { x.unwrap(); }\n}\n";
        assert!(check_source("pulse/core/src/a.rs", source, RULES).is_empty());
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = "/// let x = y.unwrap();\n// thread::sleep(d)\nfn a() {}\n";
        assert!(check_source("pulse/core/src/a.rs", source, RULES).is_empty());
    }

    #[test]
    fn test_violation_reported_with_line() {
        let source = "fn a() {\n    let v = x.unwrap();\n}\n";
        let found = check_source("pulse/core/src/a.rs", source, RULES);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 2);
        assert_eq!(found[0].rule, "panicking unwrap in library code");
    }

    #[test]
    fn test_exemptions() {
        let source = "fn load() { let s = std::fs::read_to_string(p); }\n";
        assert!(check_source("pulse/core/src/config/mod.rs", source, RULES).is_empty());
        assert_eq!(check_source("pulse/core/src/service.rs", source, RULES).len(), 1);
        // The daemon owns stdout
        assert!(check_source("pulse/daemon/src/main.rs", "println!(\"x\");\n", RULES).is_empty());
    }

    #[test]
    fn test_pure_modules_stay_runtime_free() {
        let source = "use tokio::sync::mpsc;\n";
        assert_eq!(
            check_source("pulse/core/src/session/machine.rs", source, RULES).len(),
            1
        );
        assert!(check_source("pulse/core/src/session/connection.rs", source, RULES).is_empty());
    }
}
