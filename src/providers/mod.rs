use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use futures::Stream;
use anyhow::Result;

use crate::config::{DevPilotConfig, GenerationSettings};
use crate::error::AgentError;

pub mod demo;

/// Represents a message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Sampling options for a single request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl From<&GenerationSettings> for GenerationOptions {
    fn from(settings: &GenerationSettings) -> Self {
        Self {
            max_tokens: Some(settings.max_tokens),
            temperature: Some(settings.temperature),
            top_p: Some(settings.top_p),
        }
    }
}

/// Request for a completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub options: GenerationOptions,
}

/// Response from a completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Streaming response chunk
#[derive(Debug, Clone)]
pub struct StreamingResponse {
    pub delta: String,
    pub finish_reason: Option<String>,
}

/// Stream type for responses
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<StreamingResponse>> + Send>>;

/// Main trait that all LLM providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Get provider name
    fn name(&self) -> &str;

    /// Complete a prompt (non-streaming)
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Complete a prompt (streaming)
    async fn stream_complete(&self, request: CompletionRequest) -> Result<ResponseStream>;

    /// Validate configuration
    async fn validate_config(&self) -> Result<()> {
        Ok(())
    }

    /// Estimate token count for a prompt
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Simple estimation: ~4 characters per token
        (text.len() / 4) as u32
    }
}

/// Provider registry with one active provider and a fallback order
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    order: Vec<String>,
    active: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            order: Vec::new(),
            active: None,
        }
    }

    /// Empty registry whose fallback order follows the configuration.
    pub fn from_config(config: &DevPilotConfig) -> Self {
        Self {
            providers: HashMap::new(),
            order: config.provider_order(),
            active: None,
        }
    }

    /// Register a provider. Providers not named in the configured order
    /// are tried after the configured ones, in registration order.
    pub fn register(&mut self, provider: Arc<dyn LLMProvider>) {
        let name = provider.name().to_string();
        if !self.order.contains(&name) {
            self.order.push(name.clone());
        }
        self.providers.insert(name, provider);
    }

    /// Register a provider only once its own `validate_config` passes.
    pub async fn register_checked(&mut self, provider: Arc<dyn LLMProvider>) -> Result<(), AgentError> {
        if let Err(err) = provider.validate_config().await {
            return Err(AgentError::Configuration(format!("{}: {:#}", provider.name(), err)));
        }
        self.register(provider);
        Ok(())
    }

    /// Providers named in the configuration that have no registered client,
    /// fallback order first.
    pub fn unregistered(&self, config: &DevPilotConfig) -> Vec<String> {
        let mut names = config.provider_order();
        let mut extra: Vec<String> = config
            .providers
            .keys()
            .filter(|name| !names.contains(name))
            .cloned()
            .collect();
        extra.sort();
        names.extend(extra);
        names.retain(|name| !self.providers.contains_key(name));
        names
    }

    pub fn set_active(&mut self, name: &str) -> Result<(), AgentError> {
        if !self.providers.contains_key(name) {
            return Err(AgentError::Configuration(format!("provider '{}' is not registered", name)));
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LLMProvider>> {
        self.providers.get(name).cloned()
    }

    /// Resolve the provider to use: the active one, otherwise the first
    /// registered provider in fallback order.
    pub fn active(&self) -> Result<Arc<dyn LLMProvider>, AgentError> {
        if let Some(provider) = self.active.as_deref().and_then(|name| self.get(name)) {
            return Ok(provider);
        }

        self.order
            .iter()
            .find_map(|name| self.get(name))
            .ok_or_else(|| AgentError::Configuration("no provider registered".to_string()))
    }

    pub fn list_providers(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|name| self.providers.contains_key(name.as_str()))
            .map(|s| s.as_str())
            .collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Problems with a provider's configuration
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

}
