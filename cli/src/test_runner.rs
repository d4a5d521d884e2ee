use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use questscript::config::{DiagnosticsConfig, ImportConfig};
use questscript::{Diagnostics, Generator, Imported, Importer, PluginRegistry, ValidationIssue};

const EXTENSION: &str = ".qtest";

#[derive(Debug, Deserialize)]
pub struct ExpectedIssue {
    /// Substring that must appear in the issue message.
    pub contains: String,

    /// Issue category in snake_case, e.g. `loop_exit`.
    #[serde(default)]
    pub category: Option<String>,

    /// `info`, `warning` or `error`.
    #[serde(default)]
    pub severity: Option<String>,

    /// If set, the issue's first block must start on this 1-based line.
    #[serde(default)]
    pub line: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TestConfig {
    /// Human-readable test description.
    #[serde(default)]
    pub description: Option<String>,

    /// Plugin definitions JSON, relative to the test file.
    #[serde(default)]
    pub plugins: Option<PathBuf>,

    #[serde(default)]
    pub import: ImportConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Expected issues in document order. If present (even empty), the
    /// count and content are checked.
    #[serde(default)]
    pub expect_issues: Option<Vec<ExpectedIssue>>,

    /// Expected number of non-layout source lines kept as raw text.
    #[serde(default)]
    pub expect_raw_lines: Option<usize>,

    /// If true, regenerating the imported tree must reproduce the source.
    #[serde(default)]
    pub expect_roundtrip: bool,

    /// Expected generated text (trimmed comparison).
    #[serde(default)]
    pub expect_output: Option<String>,
}

/// Parse a `.qtest` file into its TOML config and script source.
fn parse_test_file(content: &str) -> Result<(TestConfig, &str), String> {
    let content = content.trim_start_matches('\u{feff}'); // strip BOM

    if !content.starts_with("---") {
        return Err("missing opening --- frontmatter delimiter".into());
    }

    let after_open = &content[3..];
    let after_open = after_open
        .strip_prefix('\n')
        .or_else(|| after_open.strip_prefix("\r\n"))
        .unwrap_or(after_open);

    let close_pos = after_open
        .find("\n---")
        .ok_or("missing closing --- frontmatter delimiter")?;

    let toml_str = after_open[..close_pos].trim_end_matches('\r');
    let rest_start = close_pos + 4; // skip \n---
    let source = after_open[rest_start..]
        .strip_prefix("\r\n")
        .or_else(|| after_open[rest_start..].strip_prefix('\n'))
        .unwrap_or(&after_open[rest_start..]);

    let config: TestConfig =
        toml::from_str(toml_str).map_err(|e| format!("TOML parse error: {}", e))?;

    Ok((config, source))
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

fn run_single_test(path: &Path) -> TestResult {
    let (description, outcome) = match evaluate(path) {
        Ok((description, None)) => (description, TestOutcome::Pass),
        Ok((description, Some(reason))) => (description, TestOutcome::Fail(reason)),
        Err(reason) => (None, TestOutcome::Fail(reason)),
    };
    TestResult {
        path: path.to_path_buf(),
        description,
        outcome,
    }
}

/// Returns the description and the first failed expectation, if any.
fn evaluate(path: &Path) -> Result<(Option<String>, Option<String>), String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("cannot read file: {}", e))?;
    let (config, source) =
        parse_test_file(&content).map_err(|e| format!("frontmatter error: {}", e))?;

    let plugins = match &config.plugins {
        Some(file) => {
            let file = path.parent().unwrap_or(Path::new(".")).join(file);
            PluginRegistry::load(&file).map_err(|e| format!("plugins: {}", e))?
        }
        None => PluginRegistry::new(),
    };

    let imported = Importer::new(&config.import, &plugins).import(source);
    let generated = Generator::new(&plugins).generate(&imported.document);

    let failure = check_raw_lines(&config, &imported)
        .or_else(|| check_generated(&config, source, &generated.text))
        .or_else(|| {
            let expected = config.expect_issues.as_ref()?;
            let report =
                Diagnostics::new(&config.diagnostics, &plugins).validate(&imported.document);
            let actual = report.in_document_order(&imported.document);
            check_issues(source, &imported, &actual, expected)
        });
    Ok((config.description, failure))
}

fn check_raw_lines(config: &TestConfig, imported: &Imported) -> Option<String> {
    let expected = config.expect_raw_lines?;
    let actual = imported.report.raw_lines;
    if actual == expected {
        return None;
    }
    let regions: Vec<String> = imported
        .report
        .raw_blocks
        .iter()
        .map(|r| format!("  - lines {}..{}: {}", r.lines.start + 1, r.lines.end, r.reason))
        .collect();
    Some(format!(
        "expected {} raw line(s), got {}\n  raw regions:\n{}",
        expected,
        actual,
        if regions.is_empty() {
            "    (none)".to_string()
        } else {
            regions.join("\n")
        }
    ))
}

fn check_generated(config: &TestConfig, source: &str, generated: &str) -> Option<String> {
    if config.expect_roundtrip && generated != source {
        let line = source
            .lines()
            .zip(generated.lines())
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| source.lines().count().min(generated.lines().count()));
        return Some(format!(
            "round trip changed the text on line {}\n  source:    {}\n  generated: {}",
            line + 1,
            source.lines().nth(line).unwrap_or("<end of text>"),
            generated.lines().nth(line).unwrap_or("<end of text>")
        ));
    }
    let expected = config.expect_output.as_ref()?;
    let expected = expected.trim();
    let actual = generated.trim();
    if expected == actual {
        None
    } else {
        Some(format!(
            "output mismatch\n  expected:\n{}\n  actual:\n{}",
            indent(expected),
            indent(actual)
        ))
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convert a byte offset in `source` to a 1-based line number.
fn byte_offset_to_line(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())]
        .bytes()
        .filter(|&b| b == b'\n')
        .count()
        + 1
}

fn category_name(issue: &ValidationIssue) -> String {
    match serde_json::to_value(issue.category()) {
        Ok(serde_json::Value::String(name)) => name,
        _ => format!("{:?}", issue.category()),
    }
}

/// Check that actual issues match expectations. Returns `Some(reason)` on mismatch.
fn check_issues(
    source: &str,
    imported: &Imported,
    actual: &[&ValidationIssue],
    expected: &[ExpectedIssue],
) -> Option<String> {
    if actual.len() != expected.len() {
        let actual_msgs: Vec<String> = actual
            .iter()
            .map(|i| format!("  - [{}] {}", category_name(i), i))
            .collect();
        return Some(format!(
            "expected {} issue(s), got {}\n  actual issues:\n{}",
            expected.len(),
            actual.len(),
            if actual_msgs.is_empty() {
                "    (none)".to_string()
            } else {
                actual_msgs.join("\n")
            }
        ));
    }

    for (i, (actual, expected)) in actual.iter().zip(expected.iter()).enumerate() {
        let msg = actual.message();

        if !msg.contains(&expected.contains) {
            return Some(format!(
                "issue[{}]: expected message containing \"{}\", got: {}",
                i, expected.contains, msg
            ));
        }

        if let Some(category) = &expected.category {
            let name = category_name(actual);
            if &name != category {
                return Some(format!(
                    "issue[{}]: expected category {}, got {}",
                    i, category, name
                ));
            }
        }

        if let Some(severity) = &expected.severity {
            let got = actual.severity().to_string();
            if &got != severity {
                return Some(format!(
                    "issue[{}]: expected severity {}, got {}",
                    i, severity, got
                ));
            }
        }

        if let Some(expected_line) = expected.line {
            let span = actual.uids().first().and_then(|uid| imported.spans.get(uid));
            if let Some(span) = span {
                let actual_line = byte_offset_to_line(source, span.start);
                if actual_line != expected_line {
                    return Some(format!(
                        "issue[{}]: expected on line {}, but block starts on line {}",
                        i, expected_line, actual_line
                    ));
                }
            } else {
                return Some(format!(
                    "issue[{}]: expected on line {}, but issue has no source span",
                    i, expected_line
                ));
            }
        }
    }

    None
}

/// Discover `.qtest` files grouped by category (subfolder relative to root).
/// Files directly in `root` get category "" (uncategorized).
/// Returns a BTreeMap so categories are sorted alphabetically.
fn discover_categorized(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect_tests(root, root, &mut categories);
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn collect_tests(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_tests(&path, root, out);
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.ends_with(EXTENSION) {
                let category = path
                    .parent()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                out.entry(category).or_default().push(path);
            }
        }
    }
}

/// List available categories for the given test path.
pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }

    let categories = discover_categorized(path);
    if categories.is_empty() {
        eprintln!("no {} files found in {}", EXTENSION, path.display());
        return;
    }

    eprintln!("available categories:");
    for (cat, files) in &categories {
        let label = if cat.is_empty() { "(root)" } else { cat.as_str() };
        eprintln!("  {} ({} tests)", label, files.len());
    }
}

fn pass_label(no_color: bool) -> &'static str {
    if no_color { "PASS" } else { "\x1b[32mPASS\x1b[0m" }
}

fn fail_label(no_color: bool) -> &'static str {
    if no_color { "FAIL" } else { "\x1b[31mFAIL\x1b[0m" }
}

fn bold(s: &str, no_color: bool) -> String {
    if no_color {
        s.to_string()
    } else {
        format!("\x1b[1m{}\x1b[0m", s)
    }
}

fn label_for<'a>(result: &'a TestResult) -> &'a str {
    result.description.as_deref().unwrap_or_else(|| {
        result
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("?")
    })
}

fn print_failures(failures: &[TestResult]) {
    eprintln!();
    eprintln!("failures:");
    for f in failures {
        eprintln!();
        eprintln!("  --- {} ---", f.path.display());
        if let TestOutcome::Fail(reason) = &f.outcome {
            for line in reason.lines() {
                eprintln!("  {}", line);
            }
        }
    }
}

fn print_summary(passed: usize, failed: usize, no_color: bool) -> i32 {
    eprintln!();
    if failed == 0 {
        let ok = if no_color { "ok" } else { "\x1b[32mok\x1b[0m" };
        eprintln!("test result: {}. {} passed, 0 failed", ok, passed);
        0
    } else {
        let bad = if no_color { "FAILED" } else { "\x1b[31mFAILED\x1b[0m" };
        eprintln!(
            "test result: {}. {} passed, {} failed (of {})",
            bad,
            passed,
            failed,
            passed + failed
        );
        1
    }
}

/// Run all `.qtest` files under `path` (or a single file).
/// If `categories` is non-empty, only run tests in those categories.
/// Returns exit code: 0 = all pass, 1 = any failure.
pub fn run_tests(path: &Path, no_color: bool, categories: &[String]) -> i32 {
    // Single file mode ignores categories.
    if path.is_file() {
        let result = run_single_test(path);
        return match &result.outcome {
            TestOutcome::Pass => {
                eprintln!("  {}  {}", pass_label(no_color), label_for(&result));
                print_summary(1, 0, no_color)
            }
            TestOutcome::Fail(_) => {
                eprintln!("  {}  {}", fail_label(no_color), label_for(&result));
                print_failures(std::slice::from_ref(&result));
                print_summary(0, 1, no_color)
            }
        };
    }

    let all_categories = discover_categorized(path);

    if all_categories.is_empty() {
        eprintln!("no {} files found in {}", EXTENSION, path.display());
        return 1;
    }

    let run_categories: BTreeMap<&str, &Vec<PathBuf>> = if categories.is_empty() {
        all_categories.iter().map(|(k, v)| (k.as_str(), v)).collect()
    } else {
        let mut filtered = BTreeMap::new();
        for requested in categories {
            let req = requested.trim_matches('/');
            let mut found = false;
            for (cat, files) in &all_categories {
                if cat == req || cat.starts_with(&format!("{}/", req)) {
                    filtered.insert(cat.as_str(), files);
                    found = true;
                }
            }
            if !found {
                eprintln!(
                    "warning: category '{}' not found (available: {})",
                    req,
                    all_categories
                        .keys()
                        .map(|k| if k.is_empty() { "(root)" } else { k.as_str() })
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        filtered
    };

    if run_categories.is_empty() {
        eprintln!("no matching categories found");
        return 1;
    }

    let mut passed = 0usize;
    let mut failures: Vec<TestResult> = Vec::new();

    for (cat, files) in &run_categories {
        let header = if cat.is_empty() {
            "(root)".to_string()
        } else {
            cat.to_string()
        };
        eprintln!();
        eprintln!("{}", bold(&header, no_color));

        for file in *files {
            let result = run_single_test(file);
            match &result.outcome {
                TestOutcome::Pass => {
                    passed += 1;
                    eprintln!("  {}  {}", pass_label(no_color), label_for(&result));
                }
                TestOutcome::Fail(_) => {
                    eprintln!("  {}  {}", fail_label(no_color), label_for(&result));
                    failures.push(result);
                }
            }
        }
    }

    if !failures.is_empty() {
        print_failures(&failures);
    }
    print_summary(passed, failures.len(), no_color)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fixture(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn frontmatter_splits_config_from_source() {
        let (config, source) = parse_test_file(
            "---\ndescription = \"hello\"\nexpect_roundtrip = true\n---\nsub EVENT_SAY {\n}\n",
        )
        .unwrap();
        assert_eq!(config.description.as_deref(), Some("hello"));
        assert!(config.expect_roundtrip);
        assert!(config.expect_issues.is_none());
        assert_eq!(source, "sub EVENT_SAY {\n}\n");
    }

    #[test]
    fn missing_frontmatter_is_an_error() {
        assert!(parse_test_file("sub EVENT_SAY {\n}\n").is_err());
        assert!(parse_test_file("---\ndescription = \"x\"\n").is_err());
    }

    #[test]
    fn passing_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            dir.path(),
            "say.qtest",
            "---\nexpect_roundtrip = true\nexpect_raw_lines = 0\nexpect_issues = []\n---\n\
sub EVENT_SAY {\n    quest::say(\"Hail.\");\n}\n\n",
        );
        assert!(matches!(run_single_test(&path).outcome, TestOutcome::Pass));
    }

    #[test]
    fn issue_expectations_are_checked_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            dir.path(),
            "dupe.qtest",
            r#"---
[[expect_issues]]
contains = "defined 2 times"
category = "duplicate_handler"
severity = "error"
line = 1
---
sub EVENT_SAY {
}

sub EVENT_SAY {
}

"#,
        );
        let result = run_single_test(&path);
        match result.outcome {
            TestOutcome::Pass => {}
            TestOutcome::Fail(reason) => panic!("{}", reason),
        }
    }

    #[test]
    fn wrong_issue_count_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            dir.path(),
            "empty.qtest",
            "---\nexpect_issues = []\n---\n\n",
        );
        let TestOutcome::Fail(reason) = run_single_test(&path).outcome else {
            panic!("an empty script has no handler and should fail");
        };
        assert!(reason.contains("expected 0 issue(s), got 1"), "{}", reason);
    }

    #[test]
    fn bundled_fixtures_pass() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../fixtures");
        assert_eq!(run_tests(&root, true, &[]), 0);
    }

    #[test]
    fn discovery_groups_by_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("loops")).unwrap();
        write_fixture(dir.path(), "a.qtest", "");
        write_fixture(&dir.path().join("loops"), "b.qtest", "");
        write_fixture(dir.path(), "notes.txt", "");

        let found = discover_categorized(dir.path());
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["", "loops"]);
        assert_eq!(found[""].len(), 1);
    }
}
