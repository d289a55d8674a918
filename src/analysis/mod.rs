//! Static code analysis consumed by the `analyze` and `fix` capabilities.
//!
//! Each language gets a [`LanguageAnalyzer`] whose hooks default to the
//! generic heuristics; [`AnalyzerRegistry`] picks one by language tag and
//! falls back to [`GenericAnalyzer`] for anything it doesn't know.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

pub mod languages;

pub use languages::{GenericAnalyzer, JavaScriptAnalyzer, PythonAnalyzer, RustAnalyzer};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Hint => "hint",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    /// 1-based line number
    pub line: usize,
    /// 1-based column number
    pub column: usize,
    pub category: String,
    pub suggestion: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, category: &str, line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            line,
            column,
            category: category.to_string(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// One-line description used in prompts and CLI output.
    pub fn describe(&self) -> String {
        format!("[{}] line {}: {}", self.severity, self.line, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CodeMetrics {
    pub lines_of_code: usize,
    pub cyclomatic_complexity: usize,
    /// 0 (unmaintainable) to 100
    pub maintainability_index: f64,
    pub duplicated_lines: usize,
    pub code_smells: usize,
    /// Estimated remediation effort in minutes
    pub technical_debt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub issues: Vec<Issue>,
    pub metrics: CodeMetrics,
    pub suggestions: Vec<String>,
    /// 0 to 100
    pub overall_score: u8,
}

impl AnalysisReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

/// The analysis capability the agent depends on
pub trait CodeAnalyzer: Send + Sync {
    fn analyze(&self, code: &str, language: &str) -> AnalysisReport;
}

/// Per-language heuristics. Every hook has a generic default, so an
/// implementation only overrides what its language needs.
pub trait LanguageAnalyzer: Send + Sync {
    fn language(&self) -> &str;

    fn analyze_syntax(&self, _code: &str) -> Vec<Issue> {
        Vec::new()
    }

    fn analyze_performance(&self, _code: &str) -> Vec<Issue> {
        Vec::new()
    }

    fn analyze_security(&self, code: &str) -> Vec<Issue> {
        languages::generic_security(code)
    }

    fn analyze_style(&self, code: &str) -> Vec<Issue> {
        languages::generic_style(code)
    }

    fn calculate_metrics(&self, code: &str) -> CodeMetrics {
        languages::generic_metrics(code)
    }

    fn generate_suggestions(&self, issues: &[Issue], metrics: &CodeMetrics) -> Vec<String> {
        languages::generic_suggestions(issues, metrics)
    }
}

/// Lookup table from language tag to analyzer
pub struct AnalyzerRegistry {
    analyzers: HashMap<String, Arc<dyn LanguageAnalyzer>>,
    aliases: HashMap<String, String>,
    fallback: Arc<dyn LanguageAnalyzer>,
}

impl AnalyzerRegistry {
    pub fn empty() -> Self {
        Self {
            analyzers: HashMap::new(),
            aliases: HashMap::new(),
            fallback: Arc::new(GenericAnalyzer),
        }
    }

    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(RustAnalyzer));
        registry.register(Arc::new(JavaScriptAnalyzer::new("javascript")));
        registry.register(Arc::new(JavaScriptAnalyzer::new("typescript")));
        registry.register(Arc::new(PythonAnalyzer));

        for (alias, language) in [
            ("rs", "rust"),
            ("js", "javascript"),
            ("jsx", "javascript"),
            ("javascriptreact", "javascript"),
            ("ts", "typescript"),
            ("tsx", "typescript"),
            ("typescriptreact", "typescript"),
            ("py", "python"),
        ] {
            registry.alias(alias, language);
        }
        registry
    }

    pub fn register(&mut self, analyzer: Arc<dyn LanguageAnalyzer>) {
        self.analyzers.insert(analyzer.language().to_lowercase(), analyzer);
    }

    pub fn alias(&mut self, alias: &str, language: &str) {
        self.aliases.insert(alias.to_lowercase(), language.to_lowercase());
    }

    pub fn for_language(&self, language: &str) -> &dyn LanguageAnalyzer {
        let key = language.trim().to_lowercase();
        let key = self.aliases.get(&key).cloned().unwrap_or(key);
        self.analyzers
            .get(&key)
            .unwrap_or(&self.fallback)
            .as_ref()
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeAnalyzer for AnalyzerRegistry {
    fn analyze(&self, code: &str, language: &str) -> AnalysisReport {
        let analyzer = self.for_language(language);

        let mut issues = Vec::new();
        issues.extend(analyzer.analyze_syntax(code));
        issues.extend(analyzer.analyze_performance(code));
        issues.extend(analyzer.analyze_security(code));
        issues.extend(analyzer.analyze_style(code));
        dedup_issues(&mut issues);
        issues.sort_by(|a, b| (a.line, a.column, a.severity).cmp(&(b.line, b.column, b.severity)));

        let mut metrics = analyzer.calculate_metrics(code);
        metrics.code_smells = issues
            .iter()
            .filter(|i| matches!(i.severity, Severity::Warning | Severity::Info))
            .count();
        metrics.technical_debt = issues.iter().map(|i| remediation_minutes(i.severity)).sum();

        let suggestions = analyzer.generate_suggestions(&issues, &metrics);
        let overall_score = overall_score(&issues, &metrics);

        AnalysisReport {
            issues,
            metrics,
            suggestions,
            overall_score,
        }
    }
}

fn dedup_issues(issues: &mut Vec<Issue>) {
    let mut seen = HashSet::new();
    issues.retain(|i| seen.insert((i.line, i.column, i.message.clone())));
}

fn remediation_minutes(severity: Severity) -> u32 {
    match severity {
        Severity::Error => 30,
        Severity::Warning => 10,
        Severity::Info => 5,
        Severity::Hint => 1,
    }
}

fn overall_score(issues: &[Issue], metrics: &CodeMetrics) -> u8 {
    let penalty: f64 = issues
        .iter()
        .map(|i| match i.severity {
            Severity::Error => 15.0,
            Severity::Warning => 5.0,
            Severity::Info => 1.0,
            Severity::Hint => 0.0,
        })
        .sum();

    // Blend issue penalties with maintainability
    let score = (100.0 - penalty) * 0.7 + metrics.maintainability_index * 0.3;
    score.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_resolves_to_language_analyzer() {
        let registry = AnalyzerRegistry::new();
        assert_eq!(registry.for_language("TS").language(), "typescript");
        assert_eq!(registry.for_language("py").language(), "python");
        assert_eq!(registry.for_language("cobol").language(), "generic");
    }

    #[test]
    fn test_clean_code_scores_high() {
        let registry = AnalyzerRegistry::new();
        let report = registry.analyze("fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n", "rust");

        assert!(report.issues.is_empty());
        assert_eq!(report.metrics.lines_of_code, 3);
        assert_eq!(report.metrics.technical_debt, 0);
        assert!(report.overall_score >= 90);
    }

    #[test]
    fn test_issues_lower_score_and_sort_by_line() {
        let registry = AnalyzerRegistry::new();
        let code = "var x = 1;\nif (x == 1) {\n  eval(input);\n}\n";
        let report = registry.analyze(code, "javascript");

        assert!(report.count(Severity::Error) >= 1);
        assert!(report.overall_score < 90);
        let lines: Vec<usize> = report.issues.iter().map(|i| i.line).collect();
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
        assert!(report.metrics.technical_debt > 0);
        assert!(!report.suggestions.is_empty());
    }

    #[test]
    fn test_issue_describe() {
        let issue = Issue::new(Severity::Warning, "style", 4, 1, "Line too long");
        assert_eq!(issue.describe(), "[warning] line 4: Line too long");
    }
}
