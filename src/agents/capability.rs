use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::assistant::CodingAgent;
use super::prompts;
use super::task::{AnalysisResult, FixResult, Task, TaskContext, TaskOutput, TaskType};
use crate::error::{AgentError, Result};

/// Everything a capability gets to see for one invocation
#[derive(Debug, Clone, Copy)]
pub struct CapabilityRequest<'a> {
    pub description: &'a str,
    pub context: &'a TaskContext,
    /// Out-of-band parameters from a high-level caller; never set for chain-driven tasks
    pub params: Option<&'a Value>,
}

impl<'a> CapabilityRequest<'a> {
    fn require_code(&self, task_type: TaskType) -> Result<&'a str> {
        self.context
            .focus_code()
            .ok_or_else(|| AgentError::InvalidInput(format!("{} needs code in the context", task_type)))
    }

    fn string_list(&self, key: &str) -> Option<Vec<String>> {
        let items = self.params?.get(key)?.as_array()?;
        Some(items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
    }
}

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn invoke(&self, agent: &CodingAgent, request: CapabilityRequest<'_>) -> Result<TaskOutput>;
}

pub struct Capability {
    pub name: String,
    pub description: String,
    handler: Arc<dyn CapabilityHandler>,
}

impl Capability {
    pub async fn invoke(&self, agent: &CodingAgent, request: CapabilityRequest<'_>) -> Result<TaskOutput> {
        self.handler.invoke(agent, request).await
    }
}

/// Task type -> capability. Built once; read-only afterwards.
pub struct CapabilityRegistry {
    capabilities: HashMap<TaskType, Capability>,
}

impl CapabilityRegistry {
    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder {
            capabilities: HashMap::new(),
        }
    }

    /// The five built-in capabilities. `general` is left unregistered.
    pub fn with_defaults() -> Self {
        let mut builder = Self::builder();
        builder.insert(TaskType::Analyze, "Static analysis plus model insights", Arc::new(AnalyzeCapability));
        builder.insert(TaskType::Fix, "Rewrite code to resolve issues", Arc::new(FixCapability));
        builder.insert(TaskType::Generate, "Generate code from a description", Arc::new(GenerateCapability));
        builder.insert(TaskType::Explain, "Explain what code does", Arc::new(ExplainCapability));
        builder.insert(TaskType::Chain, "Run a nested sequence of tasks", Arc::new(ChainCapability));
        builder.build()
    }

    pub fn get(&self, task_type: TaskType) -> Result<&Capability> {
        self.capabilities
            .get(&task_type)
            .ok_or(AgentError::UnknownCapability(task_type))
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.capabilities.contains_key(&task_type)
    }

    pub fn list(&self) -> Vec<(TaskType, &str)> {
        let mut listed: Vec<(TaskType, &str)> = self
            .capabilities
            .iter()
            .map(|(task_type, capability)| (*task_type, capability.description.as_str()))
            .collect();
        listed.sort_by_key(|(task_type, _)| task_type.as_str());
        listed
    }
}

pub struct CapabilityRegistryBuilder {
    capabilities: HashMap<TaskType, Capability>,
}

impl CapabilityRegistryBuilder {
    /// Register a handler. A task type can only be registered once.
    pub fn register(
        &mut self,
        task_type: TaskType,
        description: &str,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<&mut Self> {
        if self.capabilities.contains_key(&task_type) {
            return Err(AgentError::InvalidInput(format!(
                "capability '{}' is already registered",
                task_type
            )));
        }
        self.insert(task_type, description, handler);
        Ok(self)
    }

    /// Start from the built-ins; `register` can then add `general`.
    pub fn with_defaults() -> Self {
        CapabilityRegistryBuilder {
            capabilities: CapabilityRegistry::with_defaults().capabilities,
        }
    }

    fn insert(&mut self, task_type: TaskType, description: &str, handler: Arc<dyn CapabilityHandler>) {
        self.capabilities.insert(task_type, Capability {
            name: task_type.as_str().to_string(),
            description: description.to_string(),
            handler,
        });
    }

    pub fn build(self) -> CapabilityRegistry {
        CapabilityRegistry {
            capabilities: self.capabilities,
        }
    }
}

/// Pull the first fenced code block out of a model reply.
pub fn extract_code_block(content: &str) -> Option<String> {
    let mut in_code_block = false;
    let mut code_content = String::new();

    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            if in_code_block {
                return Some(code_content.trim_end().to_string());
            }
            in_code_block = true;
        } else if in_code_block {
            code_content.push_str(line);
            code_content.push('\n');
        }
    }

    // Unterminated block still counts
    if in_code_block && !code_content.trim().is_empty() {
        return Some(code_content.trim_end().to_string());
    }
    None
}

/// Reply text with fenced blocks removed.
fn prose(content: &str) -> String {
    let mut in_code_block = false;
    let mut kept = Vec::new();
    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
        } else if !in_code_block {
            kept.push(line);
        }
    }
    kept.join("\n").trim().to_string()
}

struct AnalyzeCapability;

#[async_trait]
impl CapabilityHandler for AnalyzeCapability {
    async fn invoke(&self, agent: &CodingAgent, request: CapabilityRequest<'_>) -> Result<TaskOutput> {
        let code = request.require_code(TaskType::Analyze)?;
        let report = agent
            .analyzer()
            .analyze(code, request.context.language_or_default());

        let prompt = prompts::analyze(request.context, code, &report);
        let insights = agent.ask(prompts::SYSTEM_PROMPT, prompt).await?;

        Ok(TaskOutput::Analysis(AnalysisResult {
            static_analysis: report,
            ai_insights: insights.trim().to_string(),
        }))
    }
}

struct FixCapability;

#[async_trait]
impl CapabilityHandler for FixCapability {
    async fn invoke(&self, agent: &CodingAgent, request: CapabilityRequest<'_>) -> Result<TaskOutput> {
        let code = request.require_code(TaskType::Fix)?;

        // Explicit issues win; otherwise reuse the latest analysis from this chain
        let issues = request.string_list("issues").unwrap_or_else(|| {
            request
                .context
                .previous_results
                .iter()
                .rev()
                .find(|r| r.as_analysis().is_some())
                .map(|r| r.issues().iter().map(|i| i.describe()).collect())
                .unwrap_or_default()
        });

        let prompt = prompts::fix(request.context, code, &issues);
        let reply = agent.ask(prompts::SYSTEM_PROMPT, prompt).await?;

        let fixed_code = extract_code_block(&reply).unwrap_or_else(|| reply.trim().to_string());
        Ok(TaskOutput::Fix(FixResult {
            fixed_code,
            explanation: prose(&reply),
            addressed_issues: issues,
        }))
    }
}

struct GenerateCapability;

#[async_trait]
impl CapabilityHandler for GenerateCapability {
    async fn invoke(&self, agent: &CodingAgent, request: CapabilityRequest<'_>) -> Result<TaskOutput> {
        let description = request
            .params
            .and_then(|p| p.get("description"))
            .and_then(Value::as_str)
            .unwrap_or(request.description);

        let prompt = prompts::generate(description, request.context);
        let reply = agent.ask(prompts::SYSTEM_PROMPT, prompt).await?;

        Ok(TaskOutput::Code(
            extract_code_block(&reply).unwrap_or_else(|| reply.trim().to_string()),
        ))
    }
}

struct ExplainCapability;

#[async_trait]
impl CapabilityHandler for ExplainCapability {
    async fn invoke(&self, agent: &CodingAgent, request: CapabilityRequest<'_>) -> Result<TaskOutput> {
        let code = request.require_code(TaskType::Explain)?;
        let prompt = prompts::explain(request.context, code);
        let reply = agent.ask(prompts::SYSTEM_PROMPT, prompt).await?;
        Ok(TaskOutput::Explanation(reply.trim().to_string()))
    }
}

struct ChainCapability;

#[async_trait]
impl CapabilityHandler for ChainCapability {
    async fn invoke(&self, agent: &CodingAgent, request: CapabilityRequest<'_>) -> Result<TaskOutput> {
        let descriptions = request
            .string_list("tasks")
            .filter(|tasks| !tasks.is_empty())
            .ok_or_else(|| AgentError::InvalidInput("chain needs a non-empty `tasks` parameter".to_string()))?;

        let base = request.context.with_previous_results(Vec::new());
        let mut tasks: Vec<Task> = descriptions
            .into_iter()
            .map(|d| Task::from_description(d, base.clone()))
            .collect();

        let outputs = agent.execute_chained_tasks(&mut tasks).await?;
        Ok(TaskOutput::Chain(outputs))
    }
}
