use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use super::{CodeMetrics, Issue, LanguageAnalyzer, Severity};

lazy_static! {
    static ref DECISION_POINT: Regex = Regex::new(r"\b(if|for|while|case|catch|match|elif|except)\b").unwrap();
    static ref EVAL_CALL: Regex = Regex::new(r"\b(eval|exec)\s*\(").unwrap();
    static ref HARDCODED_SECRET: Regex =
        Regex::new(r#"(?i)\b(password|passwd|secret|api_?key|token)\s*[:=]\s*["'][^"']+["']"#).unwrap();
    static ref TODO_MARKER: Regex = Regex::new(r"\b(TODO|FIXME|XXX)\b").unwrap();
    static ref RUST_UNWRAP: Regex = Regex::new(r"\.(unwrap|expect)\(").unwrap();
    static ref RUST_PLACEHOLDER: Regex = Regex::new(r"\b(todo|unimplemented)!\(").unwrap();
    static ref RUST_UNSAFE: Regex = Regex::new(r"\bunsafe\b").unwrap();
    static ref RUST_CLONE: Regex = Regex::new(r"\.clone\(\)").unwrap();
    static ref JS_VAR: Regex = Regex::new(r"\bvar\s+").unwrap();
    static ref JS_LOOSE_EQ: Regex = Regex::new(r"[^=!<>]([!=]=)[^=]").unwrap();
    static ref JS_CONSOLE: Regex = Regex::new(r"\bconsole\.(log|debug)\(").unwrap();
    static ref PY_BARE_EXCEPT: Regex = Regex::new(r"^\s*except\s*:").unwrap();
    static ref PY_STAR_IMPORT: Regex = Regex::new(r"^\s*from\s+\S+\s+import\s+\*").unwrap();
    static ref PY_PRINT: Regex = Regex::new(r"\bprint\(").unwrap();
}

const MAX_LINE_LENGTH: usize = 120;

/// Run `pattern` over every line, producing one issue per match.
fn scan<F>(code: &str, pattern: &Regex, mut make: F) -> Vec<Issue>
where
    F: FnMut(usize, usize) -> Issue,
{
    let mut issues = Vec::new();
    for (index, line) in code.lines().enumerate() {
        for found in pattern.find_iter(line) {
            issues.push(make(index + 1, found.start() + 1));
        }
    }
    issues
}

fn is_code_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with("//") && !trimmed.starts_with('#')
}

pub(crate) fn generic_security(code: &str) -> Vec<Issue> {
    let mut issues = scan(code, &EVAL_CALL, |line, column| {
        Issue::new(Severity::Error, "security", line, column, "Dynamic code execution")
            .with_suggestion("Avoid evaluating strings as code")
    });
    issues.extend(scan(code, &HARDCODED_SECRET, |line, column| {
        Issue::new(Severity::Error, "security", line, column, "Possible hardcoded credential")
            .with_suggestion("Load secrets from the environment or a secret store")
    }));
    issues
}

pub(crate) fn generic_style(code: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (index, line) in code.lines().enumerate() {
        let length = line.chars().count();
        if length > MAX_LINE_LENGTH {
            issues.push(
                Issue::new(Severity::Info, "style", index + 1, MAX_LINE_LENGTH + 1, format!("Line is {} characters long", length))
                    .with_suggestion("Wrap long lines"),
            );
        }
        if line.ends_with(' ') || line.ends_with('\t') {
            issues.push(Issue::new(Severity::Hint, "style", index + 1, line.trim_end().len() + 1, "Trailing whitespace"));
        }
    }
    issues.extend(scan(code, &TODO_MARKER, |line, column| {
        Issue::new(Severity::Info, "maintainability", line, column, "Unresolved TODO marker")
    }));
    issues
}

pub(crate) fn generic_metrics(code: &str) -> CodeMetrics {
    let code_lines: Vec<&str> = code.lines().filter(|l| is_code_line(l)).collect();
    let lines_of_code = code_lines.len();

    let branches: usize = code_lines
        .iter()
        .map(|l| DECISION_POINT.find_iter(l).count() + l.matches("&&").count() + l.matches("||").count())
        .sum();
    let cyclomatic_complexity = 1 + branches;

    let mut seen = HashSet::new();
    let duplicated_lines = code_lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| l.len() >= 10)
        .filter(|l| !seen.insert(*l))
        .count();

    let maintainability_index = (100.0
        - (cyclomatic_complexity as f64 - 1.0) * 2.5
        - lines_of_code as f64 * 0.1
        - duplicated_lines as f64 * 0.5)
        .clamp(0.0, 100.0);

    CodeMetrics {
        lines_of_code,
        cyclomatic_complexity,
        maintainability_index,
        duplicated_lines,
        code_smells: 0,
        technical_debt: 0,
    }
}

pub(crate) fn generic_suggestions(issues: &[Issue], metrics: &CodeMetrics) -> Vec<String> {
    let mut suggestions = Vec::new();

    let errors = issues.iter().filter(|i| i.severity == Severity::Error).count();
    if errors > 0 {
        suggestions.push(format!("Resolve {} error(s) before shipping", errors));
    }
    if metrics.cyclomatic_complexity > 10 {
        suggestions.push("Split complex logic into smaller functions".to_string());
    }
    if metrics.duplicated_lines > 0 {
        suggestions.push("Extract duplicated lines into a shared helper".to_string());
    }

    for suggestion in issues.iter().filter_map(|i| i.suggestion.as_ref()) {
        if !suggestions.contains(suggestion) {
            suggestions.push(suggestion.clone());
        }
    }
    suggestions
}

/// Used for any language without a dedicated analyzer.
pub struct GenericAnalyzer;

impl LanguageAnalyzer for GenericAnalyzer {
    fn language(&self) -> &str {
        "generic"
    }
}

pub struct RustAnalyzer;

impl LanguageAnalyzer for RustAnalyzer {
    fn language(&self) -> &str {
        "rust"
    }

    fn analyze_syntax(&self, code: &str) -> Vec<Issue> {
        let mut issues = scan(code, &RUST_UNWRAP, |line, column| {
            Issue::new(Severity::Warning, "reliability", line, column, "Call may panic at runtime")
                .with_suggestion("Propagate the error with `?` instead of unwrapping")
        });
        issues.extend(scan(code, &RUST_PLACEHOLDER, |line, column| {
            Issue::new(Severity::Warning, "completeness", line, column, "Unfinished code path")
        }));
        issues
    }

    fn analyze_performance(&self, code: &str) -> Vec<Issue> {
        scan(code, &RUST_CLONE, |line, column| {
            Issue::new(Severity::Hint, "performance", line, column, "Clone may be avoidable")
                .with_suggestion("Borrow instead of cloning where ownership is not needed")
        })
    }

    fn analyze_security(&self, code: &str) -> Vec<Issue> {
        let mut issues = generic_security(code);
        issues.extend(scan(code, &RUST_UNSAFE, |line, column| {
            Issue::new(Severity::Warning, "security", line, column, "Unsafe block")
                .with_suggestion("Document the invariants that make this block sound")
        }));
        issues
    }
}

/// Shared by JavaScript and TypeScript
pub struct JavaScriptAnalyzer {
    language: &'static str,
}

impl JavaScriptAnalyzer {
    pub fn new(language: &'static str) -> Self {
        Self { language }
    }
}

impl LanguageAnalyzer for JavaScriptAnalyzer {
    fn language(&self) -> &str {
        self.language
    }

    fn analyze_syntax(&self, code: &str) -> Vec<Issue> {
        let mut issues = Vec::new();
        for (index, line) in code.lines().enumerate() {
            for caps in JS_LOOSE_EQ.captures_iter(line) {
                if let Some(op) = caps.get(1) {
                    issues.push(
                        Issue::new(Severity::Warning, "correctness", index + 1, op.start() + 1, format!("Loose equality `{}`", op.as_str()))
                            .with_suggestion("Use strict equality (=== / !==)"),
                    );
                }
            }
        }
        issues
    }

    fn analyze_style(&self, code: &str) -> Vec<Issue> {
        let mut issues = generic_style(code);
        issues.extend(scan(code, &JS_VAR, |line, column| {
            Issue::new(Severity::Warning, "style", line, column, "`var` declaration")
                .with_suggestion("Use `const` or `let`")
        }));
        issues.extend(scan(code, &JS_CONSOLE, |line, column| {
            Issue::new(Severity::Info, "style", line, column, "Leftover console logging")
        }));
        issues
    }
}

pub struct PythonAnalyzer;

impl LanguageAnalyzer for PythonAnalyzer {
    fn language(&self) -> &str {
        "python"
    }

    fn analyze_syntax(&self, code: &str) -> Vec<Issue> {
        scan(code, &PY_BARE_EXCEPT, |line, column| {
            Issue::new(Severity::Warning, "correctness", line, column, "Bare `except:` swallows every exception")
                .with_suggestion("Catch a specific exception type")
        })
    }

    fn analyze_style(&self, code: &str) -> Vec<Issue> {
        let mut issues = generic_style(code);
        issues.extend(scan(code, &PY_STAR_IMPORT, |line, column| {
            Issue::new(Severity::Warning, "style", line, column, "Wildcard import")
        }));
        issues.extend(scan(code, &PY_PRINT, |line, column| {
            Issue::new(Severity::Info, "style", line, column, "Debug print statement")
        }));
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_count_branches_and_duplicates() {
        let code = "// header\nif a && b {\n    total = total + 1;\n}\nwhile x {\n    total = total + 1;\n}\n";
        let metrics = generic_metrics(code);

        assert_eq!(metrics.lines_of_code, 6);
        // if, while, &&
        assert_eq!(metrics.cyclomatic_complexity, 4);
        assert_eq!(metrics.duplicated_lines, 1);
        assert!(metrics.maintainability_index < 100.0);
    }

    #[test]
    fn test_loose_equality_ignores_strict() {
        let analyzer = JavaScriptAnalyzer::new("javascript");
        let issues = analyzer.analyze_syntax("if (a === b || c == d) {}");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].column, 18);
    }

    #[test]
    fn test_rust_unwrap_and_unsafe() {
        let code = "let v = parse().unwrap();\nunsafe { go() }\n";
        let analyzer = RustAnalyzer;

        let syntax = analyzer.analyze_syntax(code);
        assert_eq!(syntax.len(), 1);
        assert_eq!(syntax[0].line, 1);

        let security = analyzer.analyze_security(code);
        assert_eq!(security.len(), 1);
        assert_eq!(security[0].line, 2);
    }

    #[test]
    fn test_hardcoded_secret_detected() {
        let issues = generic_security("api_key = \"abc123\"\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
    }

    #[test]
    fn test_python_bare_except() {
        let issues = PythonAnalyzer.analyze_syntax("try:\n    go()\nexcept:\n    pass\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, 3);
    }
}
