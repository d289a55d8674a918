use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::capability::{extract_code_block, CapabilityRegistry, CapabilityRequest};
use super::history::{ConversationHistory, ConversationTurn, TurnRole};
use super::prompts;
use super::task::{FixResult, Task, TaskContext, TaskOutput, TaskType};
use crate::analysis::{AnalysisReport, AnalyzerRegistry, CodeAnalyzer, Issue};
use crate::chains::TaskExecutor;
use crate::config::DevPilotConfig;
use crate::error::{AgentError, Result};
use crate::providers::{CompletionRequest, GenerationOptions, Message, ProviderRegistry};

/// Text chunks of a streamed answer
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Routes tasks to capabilities and talks to the active provider
pub struct CodingAgent {
    providers: Arc<ProviderRegistry>,
    analyzer: Arc<dyn CodeAnalyzer>,
    capabilities: CapabilityRegistry,
    options: GenerationOptions,
    history: Mutex<ConversationHistory>,
}

impl CodingAgent {
    pub fn new(config: &DevPilotConfig, providers: Arc<ProviderRegistry>) -> Self {
        Self::with_parts(
            providers,
            Arc::new(AnalyzerRegistry::new()),
            CapabilityRegistry::with_defaults(),
            GenerationOptions::from(&config.generation),
        )
    }

    pub fn with_parts(
        providers: Arc<ProviderRegistry>,
        analyzer: Arc<dyn CodeAnalyzer>,
        capabilities: CapabilityRegistry,
        options: GenerationOptions,
    ) -> Self {
        Self {
            providers,
            analyzer,
            capabilities,
            options,
            history: Mutex::new(ConversationHistory::new()),
        }
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn analyzer(&self) -> &dyn CodeAnalyzer {
        self.analyzer.as_ref()
    }

    async fn complete_with(&self, messages: Vec<Message>, options: GenerationOptions) -> Result<String> {
        let provider = self.providers.active()?;
        debug!("Sending {} message(s) to provider '{}'", messages.len(), provider.name());

        let response = provider
            .complete(CompletionRequest { messages, options })
            .await
            .map_err(AgentError::provider)?;

        if let Some(usage) = &response.usage {
            debug!("Provider used {} tokens", usage.total_tokens);
        }
        Ok(response.content)
    }

    /// Single-shot system + user exchange, outside the conversation window.
    pub(crate) async fn ask(&self, system: &str, prompt: String) -> Result<String> {
        self.complete_with(
            vec![Message::system(system), Message::user(prompt)],
            self.options.clone(),
        )
        .await
    }

    /// Look up the capability for `task.task_type` and run it. Task state is
    /// left untouched; see [`CodingAgent::execute_task`].
    pub async fn run_capability(&self, task: &Task, params: Option<&Value>) -> Result<TaskOutput> {
        let capability = self.capabilities.get(task.task_type)?;
        debug!("Dispatching task {} to capability '{}'", task.id, capability.name);

        capability
            .invoke(self, CapabilityRequest {
                description: &task.description,
                context: &task.context,
                params,
            })
            .await
    }

    /// Run one task through its state machine: running, then completed or failed.
    pub async fn execute_task(&self, task: &mut Task, params: Option<&Value>) -> Result<TaskOutput> {
        task.start();
        info!("Executing {} task {}", task.task_type, task.id);

        match self.run_capability(task, params).await {
            Ok(output) => {
                task.complete(output.clone());
                Ok(output)
            }
            Err(err) => {
                warn!("Task {} failed: {}", task.id, err);
                task.fail(&err);
                Err(err)
            }
        }
    }

    /// Run tasks in order, feeding each one the results of all earlier
    /// ones. Stops at the first failure.
    pub async fn execute_chained_tasks(&self, tasks: &mut [Task]) -> Result<Vec<TaskOutput>> {
        let mut results: Vec<TaskOutput> = Vec::with_capacity(tasks.len());

        for (index, task) in tasks.iter_mut().enumerate() {
            if index > 0 {
                task.context = task.context.with_previous_results(results.clone());
            }
            let output = self.execute_task(task, None).await?;
            results.push(output);
        }

        Ok(results)
    }

    async fn run_single(&self, task_type: TaskType, description: &str, context: TaskContext, params: Option<Value>) -> Result<TaskOutput> {
        let mut task = Task::new(task_type, description, context);
        self.execute_task(&mut task, params.as_ref()).await
    }

    /// Free-form question, recorded in the conversation window.
    pub async fn process_query(&self, query: &str, context: Option<&TaskContext>) -> Result<String> {
        let context_turn = context.map(prompts::context_turn);

        let mut messages = vec![Message::system(prompts::SYSTEM_PROMPT)];
        messages.extend(self.history.lock().await.to_messages());
        messages.push(Message::user(query));
        if let Some(turn) = &context_turn {
            messages.push(Message::user(turn.as_str()));
        }

        let answer = self.complete_with(messages, self.options.clone()).await?;

        // The exchange only enters the window once it has an answer
        let mut history = self.history.lock().await;
        history.push(TurnRole::User, query);
        if let Some(turn) = context_turn {
            history.push(TurnRole::User, turn);
        }
        history.push(TurnRole::Assistant, answer.clone());
        Ok(answer)
    }

    /// Run the `analyze` capability and keep only the static analysis part.
    pub async fn analyze_and_fix(&self, code: &str, language: &str) -> Result<AnalysisReport> {
        let output = self
            .run_single(TaskType::Analyze, "Analyze code", TaskContext::for_code(code, language), None)
            .await?;

        match output {
            TaskOutput::Analysis(analysis) => Ok(analysis.static_analysis),
            other => Err(AgentError::InvalidInput(format!("analyze returned {}", other.summary()))),
        }
    }

    pub async fn apply_fixes(&self, code: &str, language: &str, issues: &[Issue]) -> Result<FixResult> {
        let params = json!({ "issues": issues.iter().map(|i| i.describe()).collect::<Vec<_>>() });
        let output = self
            .run_single(TaskType::Fix, "Fix code", TaskContext::for_code(code, language), Some(params))
            .await?;

        match output {
            TaskOutput::Fix(fix) => Ok(fix),
            other => Err(AgentError::InvalidInput(format!("fix returned {}", other.summary()))),
        }
    }

    pub async fn explain_code(&self, code: &str, language: &str) -> Result<String> {
        match self
            .run_single(TaskType::Explain, "Explain code", TaskContext::for_code(code, language), None)
            .await?
        {
            TaskOutput::Explanation(text) => Ok(text),
            other => Ok(other.summary()),
        }
    }

    pub async fn generate_code(&self, description: &str, language: &str, context: Option<TaskContext>) -> Result<String> {
        let base = TaskContext {
            language: Some(language.to_string()),
            ..Default::default()
        };
        let context = context.map(|c| base.merge(&c)).unwrap_or(base);

        match self.run_single(TaskType::Generate, description, context, None).await? {
            TaskOutput::Code(code) => Ok(code),
            other => Ok(other.summary()),
        }
    }

    /// Stream an answer as text chunks. Not recorded in the conversation window.
    pub async fn stream_response(&self, query: &str) -> Result<TextStream> {
        let provider = self.providers.active()?;

        let mut messages = vec![Message::system(prompts::SYSTEM_PROMPT)];
        messages.extend(self.history.lock().await.to_messages());
        messages.push(Message::user(query));

        let stream = provider
            .stream_complete(CompletionRequest { messages, options: self.options.clone() })
            .await
            .map_err(AgentError::provider)?;

        let text = stream.filter_map(|chunk| async move {
            match chunk {
                Ok(chunk) if chunk.delta.is_empty() => None,
                Ok(chunk) => Some(Ok(chunk.delta)),
                Err(err) => Some(Err(AgentError::provider(err))),
            }
        });
        Ok(Box::pin(text))
    }

    fn completion_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: Some(256),
            temperature: Some(0.2),
            ..self.options.clone()
        }
    }

    /// Single-shot completion at the cursor, trimmed.
    pub async fn inline_completion(&self, prefix: &str, suffix: &str, language: &str) -> Result<String> {
        let messages = vec![
            Message::system(prompts::COMPLETION_SYSTEM_PROMPT),
            Message::user(prompts::inline_completion(prefix, suffix, language)),
        ];
        let completion = self.complete_with(messages, self.completion_options()).await?;
        Ok(completion.trim().to_string())
    }

    pub async fn hover_explanation(&self, symbol: &str, code: &str, language: &str) -> Result<String> {
        let reply = self.ask(prompts::SYSTEM_PROMPT, prompts::hover(symbol, code, language)).await?;
        Ok(reply.trim().to_string())
    }

    async fn rewrite(&self, prompt: String) -> Result<String> {
        let reply = self.ask(prompts::SYSTEM_PROMPT, prompt).await?;
        Ok(extract_code_block(&reply).unwrap_or_else(|| reply.trim().to_string()))
    }

    pub async fn quick_fix(&self, code: &str, language: &str, diagnostic: &str) -> Result<String> {
        self.rewrite(prompts::quick_fix(code, language, diagnostic)).await
    }

    pub async fn refactor(&self, code: &str, language: &str, instruction: &str) -> Result<String> {
        self.rewrite(prompts::refactor(code, language, instruction)).await
    }

    pub async fn optimize(&self, code: &str, language: &str) -> Result<String> {
        self.rewrite(prompts::optimize(code, language)).await
    }

    pub async fn add_comments(&self, code: &str, language: &str) -> Result<String> {
        self.rewrite(prompts::add_comments(code, language)).await
    }

    pub async fn conversation_history(&self) -> Vec<ConversationTurn> {
        self.history.lock().await.turns()
    }

    pub async fn clear_conversation(&self) {
        self.history.lock().await.clear();
    }
}

#[async_trait]
impl TaskExecutor for CodingAgent {
    async fn execute(&self, task: &Task) -> Result<TaskOutput> {
        self.run_capability(task, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::history::MAX_HISTORY;
    use crate::agents::task::TaskStatus;
    use crate::providers::{CompletionResponse, LLMProvider, MessageRole, ResponseStream, StreamingResponse};
    use futures::stream;
    use std::sync::Mutex as StdMutex;

    /// Replies with a fixed text and records every request
    struct ScriptedProvider {
        reply: String,
        seen: StdMutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                seen: StdMutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(CompletionResponse { content: self.reply.clone(), usage: None })
        }

        async fn stream_complete(&self, request: CompletionRequest) -> anyhow::Result<ResponseStream> {
            self.seen.lock().unwrap().push(request);
            let chunks: Vec<anyhow::Result<StreamingResponse>> = vec![
                Ok(StreamingResponse { delta: "one ".into(), finish_reason: None }),
                Ok(StreamingResponse { delta: "two".into(), finish_reason: None }),
                Ok(StreamingResponse { delta: String::new(), finish_reason: Some("stop".into()) }),
            ];
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LLMProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(&self, _request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
            Err(anyhow::anyhow!("503 service unavailable"))
        }

        async fn stream_complete(&self, _request: CompletionRequest) -> anyhow::Result<ResponseStream> {
            Err(anyhow::anyhow!("503 service unavailable"))
        }
    }

    fn agent_with(provider: Arc<dyn LLMProvider>) -> CodingAgent {
        let mut registry = ProviderRegistry::new();
        registry.register(provider);
        CodingAgent::new(&DevPilotConfig::default(), Arc::new(registry))
    }

    #[tokio::test]
    async fn test_execute_task_completes() {
        let provider = ScriptedProvider::new("It adds one.");
        let agent = agent_with(provider.clone());
        let mut task = Task::new(TaskType::Explain, "Explain", TaskContext::for_code("x + 1", "rust"));

        let output = agent.execute_task(&mut task, None).await.unwrap();

        assert_eq!(output, TaskOutput::Explanation("It adds one.".into()));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(output));
        assert!(task.completed_at.is_some());
        assert_eq!(provider.requests()[0].messages[0].role, MessageRole::System);
    }

    #[tokio::test]
    async fn test_unknown_capability_fails_task() {
        let agent = agent_with(ScriptedProvider::new("unused"));
        let mut task = Task::from_description("Do something", TaskContext::default());

        let err = agent.execute_task(&mut task, None).await.unwrap_err();

        assert_eq!(err, AgentError::UnknownCapability(TaskType::General));
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("general"));
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_provider_failure_is_wrapped() {
        let agent = agent_with(Arc::new(FailingProvider));
        let mut task = Task::new(TaskType::Generate, "Write a parser", TaskContext::default());

        let err = agent.execute_task(&mut task, None).await.unwrap_err();

        assert_eq!(err, AgentError::Provider("503 service unavailable".into()));
        assert_eq!(task.error.as_deref(), Some("Provider error: 503 service unavailable"));
    }

    #[tokio::test]
    async fn test_no_provider_is_configuration_error() {
        let agent = CodingAgent::new(&DevPilotConfig::default(), Arc::new(ProviderRegistry::new()));
        let err = agent.process_query("hi", None).await.unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_failed_query_leaves_history_untouched() {
        let agent = agent_with(Arc::new(FailingProvider));
        let context = TaskContext::for_code("let y = &x;", "rust");

        let err = agent.process_query("first?", Some(&context)).await.unwrap_err();

        assert!(matches!(err, AgentError::Provider(_)));
        assert!(agent.conversation_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_chained_tasks_receive_previous_results() {
        let provider = ScriptedProvider::new("```\nlet x = 1;\n```\nDeclared with let.");
        let agent = agent_with(provider.clone());
        let context = TaskContext::for_code("x = 1", "rust");
        let mut tasks = vec![
            Task::from_description("Analyze the code", context.clone()),
            Task::from_description("Fix the code", context.clone()),
        ];

        let results = agent.execute_chained_tasks(&mut tasks).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].as_analysis().is_some());
        assert!(tasks[0].context.previous_results.is_empty());
        assert_eq!(tasks[1].context.previous_results, vec![results[0].clone()]);
        match &results[1] {
            TaskOutput::Fix(fix) => {
                assert_eq!(fix.fixed_code, "let x = 1;");
                assert_eq!(fix.explanation, "Declared with let.");
            }
            other => panic!("unexpected output {:?}", other),
        }

        // the fix prompt carries the earlier analysis
        let fix_prompt = &provider.requests()[1].messages[1].content;
        assert!(fix_prompt.contains("Results from earlier steps"));
    }

    #[tokio::test]
    async fn test_chained_tasks_stop_at_first_failure() {
        let agent = agent_with(ScriptedProvider::new("ok"));
        let mut tasks = vec![
            Task::from_description("Explain this", TaskContext::for_code("a", "rust")),
            Task::from_description("Do something", TaskContext::default()),
            Task::from_description("Explain that", TaskContext::for_code("b", "rust")),
        ];

        let err = agent.execute_chained_tasks(&mut tasks).await.unwrap_err();

        assert!(matches!(err, AgentError::UnknownCapability(_)));
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert_eq!(tasks[1].status, TaskStatus::Failed);
        assert_eq!(tasks[2].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_chain_capability_runs_nested_tasks() {
        let agent = agent_with(ScriptedProvider::new("nested"));
        let params = json!({ "tasks": ["Explain the code", "Describe it again"] });

        let output = agent
            .run_single(TaskType::Chain, "Run nested", TaskContext::for_code("a", "rust"), Some(params))
            .await
            .unwrap();

        assert_eq!(
            output,
            TaskOutput::Chain(vec![
                TaskOutput::Explanation("nested".into()),
                TaskOutput::Explanation("nested".into()),
            ])
        );
    }

    #[tokio::test]
    async fn test_process_query_records_context_turn() {
        let provider = ScriptedProvider::new("Because of the borrow.");
        let agent = agent_with(provider.clone());
        let context = TaskContext::for_code("let y = &x;", "rust");

        let answer = agent.process_query("Why?", Some(&context)).await.unwrap();
        assert_eq!(answer, "Because of the borrow.");

        let history = agent.conversation_history().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "Why?");
        assert!(history[1].content.contains("let y = &x;"));
        assert_eq!(history[2].role, TurnRole::Assistant);

        // system + two user turns went to the provider
        assert_eq!(provider.requests()[0].messages.len(), 3);

        agent.clear_conversation().await;
        assert!(agent.conversation_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_history_window_holds_twenty() {
        let agent = agent_with(ScriptedProvider::new("ok"));
        for i in 0..15 {
            agent.process_query(&format!("q{}", i), None).await.unwrap();
        }

        let history = agent.conversation_history().await;
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].content, "q5");
    }

    #[tokio::test]
    async fn test_inline_completion_trimmed_and_not_recorded() {
        let agent = agent_with(ScriptedProvider::new("  x + 1\n\n"));
        let completion = agent.inline_completion("return ", ";", "rust").await.unwrap();

        assert_eq!(completion, "x + 1");
        assert!(agent.conversation_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_analyze_and_fix_returns_static_report() {
        let agent = agent_with(ScriptedProvider::new("Looks risky."));
        let report = agent.analyze_and_fix("eval(input)", "javascript").await.unwrap();
        assert_eq!(report.issues[0].category, "security");
    }

    #[tokio::test]
    async fn test_apply_fixes_passes_issue_descriptions() {
        let provider = ScriptedProvider::new("```js\nJSON.parse(input)\n```");
        let agent = agent_with(provider.clone());
        let issues = vec![Issue::new(crate::analysis::Severity::Error, "security", 1, 1, "Dynamic code execution")];

        let fix = agent.apply_fixes("eval(input)", "javascript", &issues).await.unwrap();

        assert_eq!(fix.fixed_code, "JSON.parse(input)");
        assert_eq!(fix.addressed_issues, vec!["[error] line 1: Dynamic code execution"]);
        assert!(provider.requests()[0].messages[1].content.contains("Dynamic code execution"));
    }

    #[tokio::test]
    async fn test_rewrite_operations_extract_code() {
        let agent = agent_with(ScriptedProvider::new("Here:\n```\nfn fast() {}\n```"));
        assert_eq!(agent.optimize("fn slow() {}", "rust").await.unwrap(), "fn fast() {}");
        assert_eq!(agent.refactor("fn slow() {}", "rust", "Rename").await.unwrap(), "fn fast() {}");
        assert_eq!(agent.quick_fix("fn slow() {}", "rust", "E0425").await.unwrap(), "fn fast() {}");
        assert_eq!(agent.add_comments("fn slow() {}", "rust").await.unwrap(), "fn fast() {}");
    }

    #[tokio::test]
    async fn test_generate_and_hover() {
        let agent = agent_with(ScriptedProvider::new("```\nfn sort() {}\n```"));
        let code = agent.generate_code("Write a sort", "rust", None).await.unwrap();
        assert_eq!(code, "fn sort() {}");

        let hover = agent.hover_explanation("sort", "sort()", "rust").await.unwrap();
        assert!(hover.starts_with("```"));
    }

    #[tokio::test]
    async fn test_stream_response_skips_empty_chunks() {
        let agent = agent_with(ScriptedProvider::new("unused"));
        let chunks: Vec<String> = agent
            .stream_response("count")
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks, vec!["one ".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_explain_code() {
        let agent = agent_with(ScriptedProvider::new(" Prints a greeting. "));
        let text = agent.explain_code("println!(\"hi\")", "rust").await.unwrap();
        assert_eq!(text, "Prints a greeting.");
    }
}
