use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::{AnalysisReport, Issue};
use crate::error::AgentError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Analyze,
    Fix,
    Generate,
    Explain,
    Chain,
    General,
}

const KEYWORDS: [(&[&str], TaskType); 4] = [
    (&["analyze", "check", "review"], TaskType::Analyze),
    (&["fix", "correct", "repair"], TaskType::Fix),
    (&["generate", "create", "write"], TaskType::Generate),
    (&["explain", "describe", "clarify"], TaskType::Explain),
];

impl TaskType {
    /// Keyword classification of a free-text description. A description
    /// that opens with a keyword is classified by that verb; otherwise the
    /// groups are checked in priority order and the first hit wins.
    pub fn infer(description: &str) -> Self {
        let lower = description.to_lowercase();
        let leading = lower
            .split(|c: char| !c.is_alphanumeric())
            .find(|word| !word.is_empty())
            .unwrap_or("");

        if let Some((_, task_type)) = KEYWORDS
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| is_verb_form(leading, k)))
        {
            return *task_type;
        }

        KEYWORDS
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(_, task_type)| *task_type)
            .unwrap_or(TaskType::General)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Analyze => "analyze",
            TaskType::Fix => "fix",
            TaskType::Generate => "generate",
            TaskType::Explain => "explain",
            TaskType::Chain => "chain",
            TaskType::General => "general",
        }
    }
}

/// `word` is `verb` or one of its regular inflections ("fixes", "reviewed",
/// "writing"). Nouns sharing the prefix ("correctness") do not count.
fn is_verb_form(word: &str, verb: &str) -> bool {
    if word == verb {
        return true;
    }
    let stem = verb.strip_suffix('e').unwrap_or(verb);
    ["s", "es", "d", "ed", "ing"].iter().any(|suffix| {
        word.strip_suffix(suffix)
            .is_some_and(|rest| rest == verb || rest == stem)
    })
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle shared by tasks and chains: pending -> running -> completed | failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What code or situation an operation is about
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskContext {
    pub code: Option<String>,
    pub language: Option<String>,
    pub selected_text: Option<String>,
    pub file_path: Option<String>,
    pub project_context: Option<String>,
    #[serde(default)]
    pub previous_results: Vec<TaskOutput>,
}

impl TaskContext {
    pub fn for_code(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            language: Some(language.into()),
            ..Default::default()
        }
    }

    /// Shallow merge: fields set on `other` win. `previous_results` is
    /// taken wholesale from `other` when it has any.
    pub fn merge(&self, other: &TaskContext) -> TaskContext {
        TaskContext {
            code: other.code.clone().or_else(|| self.code.clone()),
            language: other.language.clone().or_else(|| self.language.clone()),
            selected_text: other.selected_text.clone().or_else(|| self.selected_text.clone()),
            file_path: other.file_path.clone().or_else(|| self.file_path.clone()),
            project_context: other.project_context.clone().or_else(|| self.project_context.clone()),
            previous_results: if other.previous_results.is_empty() {
                self.previous_results.clone()
            } else {
                other.previous_results.clone()
            },
        }
    }

    /// Copy of this context whose prior results are replaced by `results`.
    pub fn with_previous_results(&self, results: Vec<TaskOutput>) -> TaskContext {
        TaskContext {
            previous_results: results,
            ..self.clone()
        }
    }

    /// The text an operation should focus on: the selection if there is
    /// one, otherwise the whole code.
    pub fn focus_code(&self) -> Option<&str> {
        self.selected_text.as_deref().or(self.code.as_deref())
    }

    pub fn language_or_default(&self) -> &str {
        self.language.as_deref().unwrap_or("plaintext")
    }
}

/// Output of the `analyze` capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub static_analysis: AnalysisReport,
    pub ai_insights: String,
}

/// Output of the `fix` capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixResult {
    pub fixed_code: String,
    pub explanation: String,
    pub addressed_issues: Vec<String>,
}

/// Result of a capability; the variant depends on the task type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum TaskOutput {
    Analysis(AnalysisResult),
    Fix(FixResult),
    Code(String),
    Explanation(String),
    Text(String),
    Chain(Vec<TaskOutput>),
}

impl TaskOutput {
    pub fn as_analysis(&self) -> Option<&AnalysisResult> {
        match self {
            TaskOutput::Analysis(analysis) => Some(analysis),
            _ => None,
        }
    }

    /// Issues carried by an analysis result, if this is one.
    pub fn issues(&self) -> &[Issue] {
        self.as_analysis()
            .map(|a| a.static_analysis.issues.as_slice())
            .unwrap_or(&[])
    }

    /// Short human-readable form, used when feeding results forward into prompts.
    pub fn summary(&self) -> String {
        match self {
            TaskOutput::Analysis(analysis) => format!(
                "Analysis: score {}/100, {} issue(s). {}",
                analysis.static_analysis.overall_score,
                analysis.static_analysis.issues.len(),
                analysis.ai_insights.lines().next().unwrap_or("")
            ),
            TaskOutput::Fix(fix) => format!("Fix: {}", fix.explanation.lines().next().unwrap_or("")),
            TaskOutput::Code(code) => format!("Generated code:\n{}", code),
            TaskOutput::Explanation(text) => format!("Explanation: {}", text),
            TaskOutput::Text(text) => text.clone(),
            TaskOutput::Chain(outputs) => outputs
                .iter()
                .map(|o| o.summary())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub description: String,
    pub context: TaskContext,
    pub status: TaskStatus,
    pub result: Option<TaskOutput>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(task_type: TaskType, description: impl Into<String>, context: TaskContext) -> Self {
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            task_type,
            description: description.into(),
            context,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Build a task whose type is inferred from the description.
    pub fn from_description(description: impl Into<String>, context: TaskContext) -> Self {
        let description = description.into();
        Self::new(TaskType::infer(&description), description, context)
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
    }

    pub fn complete(&mut self, output: TaskOutput) {
        self.status = TaskStatus::Completed;
        self.result = Some(output);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &AgentError) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_string());
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CANCELLED_MESSAGE;

    #[test]
    fn test_type_inference_examples() {
        assert_eq!(TaskType::infer("Review this function for bugs"), TaskType::Analyze);
        assert_eq!(TaskType::infer("Write a sorting function"), TaskType::Generate);
        assert_eq!(TaskType::infer("Repair the null check"), TaskType::Fix);
        assert_eq!(TaskType::infer("Describe what this does"), TaskType::Explain);
        assert_eq!(TaskType::infer("Do something"), TaskType::General);
    }

    #[test]
    fn test_type_inference_priority() {
        // a leading verb decides
        assert_eq!(TaskType::infer("Check and FIX the parser"), TaskType::Analyze);
        assert_eq!(TaskType::infer("Fix it, then write tests"), TaskType::Fix);
        assert_eq!(TaskType::infer("Create docs to explain it"), TaskType::Generate);
        assert_eq!(TaskType::infer("Fixing the parser, then check it"), TaskType::Fix);
        assert_eq!(TaskType::infer("Reviewed code needs clarifying"), TaskType::Analyze);

        // a leading noun sharing a keyword prefix does not count as the verb
        assert_eq!(TaskType::infer("Correctness review of the parser"), TaskType::Analyze);
        assert_eq!(TaskType::infer("Writer module: fix the flush"), TaskType::Fix);

        // otherwise analyze outranks fix, fix outranks generate
        assert_eq!(TaskType::infer("Please fix and review the parser"), TaskType::Analyze);
        assert_eq!(TaskType::infer("Now write a fix for the crash"), TaskType::Fix);
        assert_eq!(TaskType::infer("Then clarify the generated output"), TaskType::Generate);
    }

    #[test]
    fn test_merge_prefers_later_fields() {
        let base = TaskContext {
            code: Some("a".into()),
            language: Some("rust".into()),
            previous_results: vec![TaskOutput::Text("old".into())],
            ..Default::default()
        };
        let overlay = TaskContext {
            code: Some("b".into()),
            file_path: Some("main.rs".into()),
            ..Default::default()
        };

        let merged = base.merge(&overlay);
        assert_eq!(merged.code.as_deref(), Some("b"));
        assert_eq!(merged.language.as_deref(), Some("rust"));
        assert_eq!(merged.file_path.as_deref(), Some("main.rs"));
        assert_eq!(merged.previous_results, vec![TaskOutput::Text("old".into())]);

        let replaced = merged.with_previous_results(vec![TaskOutput::Code("x".into())]);
        assert_eq!(replaced.previous_results, vec![TaskOutput::Code("x".into())]);
    }

    #[test]
    fn test_completed_at_only_on_terminal() {
        let mut task = Task::from_description("Explain", TaskContext::default());
        assert_eq!(task.task_type, TaskType::Explain);
        assert!(task.completed_at.is_none());

        task.start();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.completed_at.is_none());

        task.fail(&AgentError::Cancelled);
        assert!(task.status.is_terminal());
        assert!(task.completed_at.is_some());
        assert_eq!(task.error.as_deref(), Some(CANCELLED_MESSAGE));
    }

    #[test]
    fn test_output_serializes_with_kind_tag() {
        let json = serde_json::to_value(TaskOutput::Code("fn main() {}".into())).unwrap();
        assert_eq!(json["kind"], "code");
        assert_eq!(json["value"], "fn main() {}");
    }
}
