//! Task chains: named, ordered task sequences executed one step at a time,
//! each step seeing the results of the steps before it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{Task, TaskOutput, TaskStatus};
use crate::error::Result;

pub mod manager;

pub use manager::TaskManager;

/// Runs a single task on behalf of the chain engine. The engine owns the
/// task's state transitions; implementors only produce the output.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<TaskOutput>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskChain {
    pub id: String,
    pub name: String,
    pub tasks: Vec<Task>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Outputs of completed tasks, in task order
    pub results: Vec<TaskOutput>,
    #[serde(default)]
    pub paused: bool,
    /// Bumped on cancellation so late results can be recognised as stale
    #[serde(skip)]
    epoch: u64,
}

impl TaskChain {
    pub(crate) fn new(name: &str, tasks: Vec<Task>) -> Self {
        Self {
            id: format!("chain-{}", uuid::Uuid::new_v4()),
            name: name.to_string(),
            tasks,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            results: Vec::new(),
            paused: false,
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    pub fn completed_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count()
    }

    /// Fraction of tasks completed, 0 for an empty chain.
    pub fn progress(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        self.completed_count() as f64 / self.tasks.len() as f64
    }
}

/// Counts of chains by status
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// A task that has been handed to an executor and not yet returned
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveTask {
    pub task_id: String,
    pub chain_id: String,
    pub started_at: DateTime<Utc>,
}

/// Lifecycle notifications for observers (UI, CLI)
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChainEvent {
    ChainCreated { chain_id: String },
    ChainStarted { chain_id: String },
    TaskStarted { chain_id: String, task_id: String, index: usize },
    TaskCompleted { chain_id: String, task_id: String, index: usize },
    TaskFailed { chain_id: String, task_id: String, index: usize, error: String },
    ChainCompleted { chain_id: String },
    ChainFailed { chain_id: String, error: String },
    ChainCancelled { chain_id: String },
    ChainPaused { chain_id: String },
    ChainResumed { chain_id: String },
    ChainDeleted { chain_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Task, TaskContext, TaskType};

    #[test]
    fn test_progress_of_empty_chain_is_zero() {
        let chain = TaskChain::new("empty", Vec::new());
        assert_eq!(chain.progress(), 0.0);
        assert_eq!(chain.status, TaskStatus::Pending);
    }

    #[test]
    fn test_progress_counts_completed() {
        let mut tasks: Vec<Task> = (0..4)
            .map(|_| Task::new(TaskType::Explain, "Explain", TaskContext::default()))
            .collect();
        tasks[0].complete(TaskOutput::Text("a".into()));
        tasks[1].start();

        let chain = TaskChain::new("partial", tasks);
        assert_eq!(chain.progress(), 0.25);
    }

    #[test]
    fn test_event_serialization() {
        let event = ChainEvent::ChainCancelled { chain_id: "chain-1".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "chain_cancelled");
        assert_eq!(json["chain_id"], "chain-1");
    }
}
