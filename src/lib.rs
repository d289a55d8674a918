//! DevPilot: an editor-side coding assistant built around an LLM provider
//! registry, typed capabilities and sequential task chains.

pub mod agents;
pub mod analysis;
pub mod chains;
pub mod config;
pub mod error;
pub mod providers;

pub use agents::{CodingAgent, Task, TaskContext, TaskOutput, TaskStatus, TaskType};
pub use chains::{ChainEvent, TaskChain, TaskExecutor, TaskManager};
pub use config::DevPilotConfig;
pub use error::{AgentError, Result};
