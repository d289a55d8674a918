use crate::analysis::AnalysisReport;

use super::task::{TaskContext, TaskOutput};

pub const SYSTEM_PROMPT: &str = "You are an expert software developer embedded in a code editor. \
Give precise, working answers. Put code in fenced code blocks.";

pub const COMPLETION_SYSTEM_PROMPT: &str = "You complete code. Reply with only the text to insert at the cursor, no commentary and no code fences.";

fn code_block(code: &str, language: &str) -> String {
    format!("```{}\n{}\n```", language, code)
}

fn previous_results_section(results: &[TaskOutput]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut section = String::from("\n\nResults from earlier steps:\n");
    for (index, result) in results.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", index + 1, result.summary()));
    }
    section
}

fn project_section(context: &TaskContext) -> String {
    let mut section = String::new();
    if let Some(path) = &context.file_path {
        section.push_str(&format!("\nFile: {}", path));
    }
    if let Some(project) = &context.project_context {
        section.push_str(&format!("\nProject context: {}", project));
    }
    section
}

pub fn analyze(context: &TaskContext, code: &str, report: &AnalysisReport) -> String {
    let language = context.language_or_default();
    let findings = if report.issues.is_empty() {
        "none".to_string()
    } else {
        report.issues.iter().map(|i| i.describe()).collect::<Vec<_>>().join("\n")
    };

    format!(
        "Analyze the following {} code for bugs, design problems and risks.{}\n\n{}\n\nStatic analyzer findings:\n{}\n\nSummarize the most important insights first.{}",
        language,
        project_section(context),
        code_block(code, language),
        findings,
        previous_results_section(&context.previous_results)
    )
}

pub fn fix(context: &TaskContext, code: &str, issues: &[String]) -> String {
    let language = context.language_or_default();
    let issue_list = if issues.is_empty() {
        "Any bugs you can find".to_string()
    } else {
        issues.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n")
    };

    format!(
        "Fix the following {} code.{}\n\n{}\n\nIssues to address:\n{}\n\nReturn the full corrected code in one code block, followed by a short note on what changed.{}",
        language,
        project_section(context),
        code_block(code, language),
        issue_list,
        previous_results_section(&context.previous_results)
    )
}

pub fn generate(description: &str, context: &TaskContext) -> String {
    let language = context.language_or_default();
    let mut prompt = format!("Generate {} code for this request: {}{}", language, description, project_section(context));
    if let Some(code) = context.focus_code() {
        prompt.push_str(&format!("\n\nExisting code for reference:\n{}", code_block(code, language)));
    }
    prompt.push_str(&previous_results_section(&context.previous_results));
    prompt
}

pub fn explain(context: &TaskContext, code: &str) -> String {
    let language = context.language_or_default();
    format!(
        "Explain what this {} code does, step by step, and call out anything surprising.{}\n\n{}{}",
        language,
        project_section(context),
        code_block(code, language),
        previous_results_section(&context.previous_results)
    )
}

/// Synthetic turn describing the code a free-form query is about.
pub fn context_turn(context: &TaskContext) -> String {
    let language = context.language_or_default();
    let mut turn = format!("Context for my question ({} code):", language);
    turn.push_str(&project_section(context));
    if let Some(code) = context.focus_code() {
        turn.push_str(&format!("\n\n{}", code_block(code, language)));
    }
    turn
}

pub fn inline_completion(prefix: &str, suffix: &str, language: &str) -> String {
    format!(
        "Language: {}\n\nText before the cursor:\n{}\n\nText after the cursor:\n{}\n\nWhat goes at the cursor?",
        language, prefix, suffix
    )
}

pub fn hover(symbol: &str, code: &str, language: &str) -> String {
    format!(
        "In one or two sentences, explain `{}` as used in this {} code:\n\n{}",
        symbol,
        language,
        code_block(code, language)
    )
}

pub fn quick_fix(code: &str, language: &str, diagnostic: &str) -> String {
    format!(
        "The editor reports: {}\n\nFix it in this {} code and return only the corrected code:\n\n{}",
        diagnostic,
        language,
        code_block(code, language)
    )
}

pub fn refactor(code: &str, language: &str, instruction: &str) -> String {
    format!(
        "Refactor this {} code. {}\nKeep behaviour identical and return only the refactored code:\n\n{}",
        language,
        instruction,
        code_block(code, language)
    )
}

pub fn optimize(code: &str, language: &str) -> String {
    format!(
        "Optimize this {} code for speed and memory without changing behaviour. Return only the optimized code:\n\n{}",
        language,
        code_block(code, language)
    )
}

pub fn add_comments(code: &str, language: &str) -> String {
    format!(
        "Add clear documentation comments to this {} code. Do not change the code itself; return the commented code:\n\n{}",
        language,
        code_block(code, language)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_results_are_listed() {
        let context = TaskContext::for_code("x=1", "python")
            .with_previous_results(vec![TaskOutput::Text("first".into()), TaskOutput::Code("y=2".into())]);

        let prompt = fix(&context, "x=1", &["Unused variable".to_string()]);
        assert!(prompt.contains("```python\nx=1\n```"));
        assert!(prompt.contains("- Unused variable"));
        assert!(prompt.contains("1. first"));
        assert!(prompt.contains("2. Generated code:\ny=2"));
    }

    #[test]
    fn test_context_turn_prefers_selection() {
        let context = TaskContext {
            code: Some("whole file".into()),
            selected_text: Some("just this".into()),
            file_path: Some("src/lib.rs".into()),
            ..Default::default()
        };

        let turn = context_turn(&context);
        assert!(turn.contains("just this"));
        assert!(!turn.contains("whole file"));
        assert!(turn.contains("File: src/lib.rs"));
        assert!(turn.contains("plaintext"));
    }
}
