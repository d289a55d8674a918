use thiserror::Error;

use crate::agents::TaskType;

/// Message stamped onto tasks that were stopped by an explicit cancel.
pub const CANCELLED_MESSAGE: &str = "Task cancelled";

/// Errors surfaced by the agent and the chain engine
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    #[error("No LLM provider configured: {0}")]
    Configuration(String),

    #[error("No capability registered for task type '{0}'")]
    UnknownCapability(TaskType),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Chain {id} cannot be executed from status '{status}'")]
    InvalidState { id: String, status: String },
}

impl AgentError {
    /// Wrap a provider-level failure, keeping its readable message.
    pub fn provider(err: anyhow::Error) -> Self {
        AgentError::Provider(format!("{:#}", err))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
