pub mod assistant;
pub mod capability;
pub mod history;
pub mod prompts;
pub mod task;

pub use assistant::{CodingAgent, TextStream};
pub use capability::{
    extract_code_block, Capability, CapabilityHandler, CapabilityRegistry, CapabilityRegistryBuilder,
    CapabilityRequest,
};
pub use history::{ConversationHistory, ConversationTurn, TurnRole, MAX_HISTORY};
pub use task::{AnalysisResult, FixResult, Task, TaskContext, TaskOutput, TaskStatus, TaskType};
